use serde::ser::{self, Impossible, Serialize, Serializer};
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    // Slots of dropped guards below the top are `None` until the top pops.
    static CURRENT: RefCell<Vec<Option<Context>>> = const { RefCell::new(Vec::new()) };
}

trait DynKey: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn fmt_display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<K> DynKey for K
where
    K: Any + PartialEq + fmt::Display + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other
            .as_any()
            .downcast_ref::<K>()
            .is_some_and(|other| self == other)
    }

    fn fmt_display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }

    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity used to store and look up a value in a [`Context`].
///
/// Any comparable, displayable type can serve as a key. Two keys are equal
/// only when they have the same concrete type and compare equal, so a typed
/// key `RequestId` never matches the plain string `"request_id"` even though
/// both render the same field name.
///
/// ```
/// use std::fmt;
/// use tracing_ctx_logger::context::{Context, ContextKey};
///
/// #[derive(Debug, PartialEq)]
/// struct RequestId;
///
/// impl fmt::Display for RequestId {
///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         f.write_str("request_id")
///     }
/// }
///
/// let typed = ContextKey::new(RequestId);
/// let ctx = Context::background().with_value(typed.clone(), "req-1");
/// assert!(ctx.value(&typed).is_some());
/// assert!(ctx.value(&ContextKey::from("request_id")).is_none());
/// ```
#[derive(Clone)]
pub struct ContextKey(Arc<dyn DynKey>);

impl ContextKey {
    pub fn new<K>(key: K) -> Self
    where
        K: Any + PartialEq + fmt::Display + fmt::Debug + Send + Sync,
    {
        let any = &key as &dyn Any;
        if let Some(existing) = any.downcast_ref::<ContextKey>() {
            return existing.clone();
        }
        // String literals and owned strings name the same key.
        if let Some(name) = any.downcast_ref::<&'static str>() {
            return Self(Arc::new(name.to_string()));
        }
        Self(Arc::new(key))
    }

    /// Field name used when the key's value is attached to a record.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for ContextKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(&*other.0)
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_display(f)
    }
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextKey(")?;
        self.0.fmt_debug(f)?;
        f.write_str(")")
    }
}

impl From<&'static str> for ContextKey {
    fn from(name: &'static str) -> Self {
        Self(Arc::new(name.to_string()))
    }
}

impl From<String> for ContextKey {
    fn from(name: String) -> Self {
        Self(Arc::new(name))
    }
}

/// A value stored in a [`Context`].
///
/// Values are kept in their original type and only turned into a
/// [`serde_json::Value`] when a handler reads them, so composite values are
/// rendered structurally rather than stringified up front.
pub trait ContextValue: Send + Sync + 'static {
    /// The value as JSON. A top-level non-finite float renders as `"NaN"`,
    /// `"+Inf"` or `"-Inf"`; nested ones follow `serde_json` and become `null`.
    fn to_log_value(&self) -> Result<Value, serde_json::Error>;

    /// Whether the value serializes as "none" (`Option::None`, `()`, a unit
    /// struct). Such values count as absent.
    fn is_none(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<T> ContextValue for T
where
    T: Serialize + Send + Sync + 'static,
{
    fn to_log_value(&self) -> Result<Value, serde_json::Error> {
        match self.serialize(ScalarShape) {
            Ok(Shape::None) => Ok(Value::Null),
            Ok(Shape::Float(f)) if !f.is_finite() => Ok(Value::String(non_finite(f).to_string())),
            _ => serde_json::to_value(self),
        }
    }

    fn is_none(&self) -> bool {
        matches!(self.serialize(ScalarShape), Ok(Shape::None))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn non_finite(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "+Inf"
    } else {
        "-Inf"
    }
}

enum Shape {
    None,
    Float(f64),
    Other,
}

#[derive(thiserror::Error, Debug)]
#[error("composite value")]
struct Composite;

impl ser::Error for Composite {
    fn custom<T: fmt::Display>(_msg: T) -> Self {
        Composite
    }
}

/// Serializer that only looks at the top level of a value: whether it is
/// "none", a float, or anything else. Composite values stop at the first
/// call with [`Composite`].
struct ScalarShape;

impl Serializer for ScalarShape {
    type Ok = Shape;
    type Error = Composite;
    type SerializeSeq = Impossible<Shape, Composite>;
    type SerializeTuple = Impossible<Shape, Composite>;
    type SerializeTupleStruct = Impossible<Shape, Composite>;
    type SerializeTupleVariant = Impossible<Shape, Composite>;
    type SerializeMap = Impossible<Shape, Composite>;
    type SerializeStruct = Impossible<Shape, Composite>;
    type SerializeStructVariant = Impossible<Shape, Composite>;

    fn serialize_bool(self, _: bool) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_i8(self, _: i8) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_i16(self, _: i16) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_i32(self, _: i32) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_i64(self, _: i64) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_u8(self, _: u8) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_u16(self, _: u16) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_u32(self, _: u32) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_u64(self, _: u64) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_f32(self, v: f32) -> Result<Shape, Composite> {
        Ok(Shape::Float(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<Shape, Composite> {
        Ok(Shape::Float(v))
    }

    fn serialize_char(self, _: char) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_str(self, _: &str) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_bytes(self, _: &[u8]) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_none(self) -> Result<Shape, Composite> {
        Ok(Shape::None)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Shape, Composite> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Shape, Composite> {
        Ok(Shape::None)
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<Shape, Composite> {
        Ok(Shape::None)
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<Shape, Composite> {
        Ok(Shape::Other)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(self, _: &'static str, value: &T) -> Result<Shape, Composite> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<Shape, Composite> {
        Err(Composite)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq, Composite> {
        Err(Composite)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple, Composite> {
        Err(Composite)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeTupleStruct, Composite> {
        Err(Composite)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, Composite> {
        Err(Composite)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap, Composite> {
        Err(Composite)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct, Composite> {
        Err(Composite)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, Composite> {
        Err(Composite)
    }
}

struct Entry {
    key: ContextKey,
    value: Arc<dyn ContextValue>,
    parent: Option<Arc<Entry>>,
}

/// Immutable key/value bag carried alongside a log call.
///
/// Deriving a context with [`Context::with_value`] never changes the
/// original; the derived copy shadows parent values with the same key.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Entry>>,
}

impl Context {
    /// The empty context.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_value<V: ContextValue>(&self, key: impl Into<ContextKey>, value: V) -> Self {
        Self {
            head: Some(Arc::new(Entry {
                key: key.into(),
                value: Arc::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// The innermost value stored under `key`, if any.
    pub fn value(&self, key: &ContextKey) -> Option<&dyn ContextValue> {
        let mut entry = self.head.as_deref();
        while let Some(current) = entry {
            if current.key == *key {
                return Some(&*current.value);
            }
            entry = current.parent.as_deref();
        }
        None
    }

    /// Typed access to a stored value.
    pub fn get<T: Any>(&self, key: &ContextKey) -> Option<&T> {
        self.value(key).and_then(|value| value.as_any().downcast_ref::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The context most recently attached on this thread and still
    /// attached, or background.
    pub fn current() -> Self {
        CURRENT.with(|stack| stack.borrow().last().cloned().flatten().unwrap_or_default())
    }

    /// Make this context the thread's current one until the guard drops.
    pub fn attach(self) -> ContextGuard {
        let slot = CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Some(self));
            stack.len() - 1
        });
        ContextGuard {
            slot,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with this context attached.
    pub fn scope<R>(self, f: impl FnOnce() -> R) -> R {
        let _guard = self.attach();
        f()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_list();
        let mut entry = self.head.as_deref();
        while let Some(current) = entry {
            keys.entry(&current.key);
            entry = current.parent.as_deref();
        }
        keys.finish()
    }
}

/// Detaches its context when dropped.
///
/// Dropping guards out of order detaches exactly the guard's own context;
/// the innermost context still attached stays current. The guard belongs to
/// the thread that attached it:
///
/// ```compile_fail
/// use tracing_ctx_logger::context::Context;
///
/// let guard = Context::background().with_value("k", 1).attach();
/// std::thread::spawn(move || drop(guard));
/// ```
#[must_use = "the context is detached as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    slot: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            if self.slot + 1 == stack.len() {
                stack.pop();
                while matches!(stack.last(), Some(None)) {
                    stack.pop();
                }
            } else if let Some(slot) = stack.get_mut(self.slot) {
                *slot = None;
            }
        });
    }
}

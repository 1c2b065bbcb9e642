use crate::config::DevFlavor;
use crate::console::{render_value, HandlerOptions, OutputStream};
use crate::context::Context;
use crate::handler::{Handler, HandlerError, SharedHandler};
use crate::record::{Attr, FlatAttrs, Record};
use colored::{ColoredString, Colorize};
use std::sync::Arc;
use tracing::Level;

/// Human-oriented, colourised console output for local development.
///
/// Colour follows the `colored` crate's terminal detection (`NO_COLOR`,
/// `CLICOLOR_FORCE`, tty check).
#[derive(Debug, Clone)]
pub struct DevHandler {
    stream: OutputStream,
    opts: HandlerOptions,
    flavor: DevFlavor,
    attrs: FlatAttrs,
}

impl DevHandler {
    pub fn new(stream: OutputStream, opts: HandlerOptions, flavor: DevFlavor) -> Self {
        Self {
            stream,
            opts,
            flavor,
            attrs: FlatAttrs::default(),
        }
    }

    fn encode(&self, record: &Record) -> String {
        match self.flavor {
            DevFlavor::Tint => self.single_line(record, "%H:%M:%S%.3f", false),
            DevFlavor::Slogor => self.single_line(record, "%b %e %H:%M:%S", true),
            DevFlavor::Devslog => self.multi_line(record),
        }
    }

    fn single_line(&self, record: &Record, time_format: &str, short_level: bool) -> String {
        let time = record.timestamp.format(time_format).to_string();
        let label = if short_level {
            short_label(&record.level)
        } else {
            record.level.as_str()
        };
        let mut line = format!("{} {} ", time.dimmed(), paint(&record.level, label));
        if self.opts.add_source || self.flavor == DevFlavor::Slogor {
            if let Some(source) = &record.source {
                line.push_str(&format!("{} ", format!("{}:{}", source.file, source.line).dimmed()));
            }
        }
        line.push_str(&record.message);
        for (key, value) in self.attrs.resolve(record.attrs()) {
            line.push_str(&format!(" {}{}", format!("{key}=").dimmed(), render_value(value)));
        }
        line
    }

    fn multi_line(&self, record: &Record) -> String {
        let mut line = format!(
            "[{}] {} {}",
            record.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
            paint(&record.level, record.level.as_str()),
            record.message.bold()
        );
        if self.opts.add_source {
            if let Some(source) = &record.source {
                line.push_str(&format!("\n  {} {}:{}", "@".dimmed(), source.file, source.line));
            }
        }
        let mut attrs: Vec<_> = self.attrs.resolve(record.attrs()).collect();
        attrs.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in attrs {
            line.push_str(&format!("\n  {}: {}", key.cyan(), render_value(value)));
        }
        line
    }
}

fn short_label(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERR",
        Level::WARN => "WRN",
        Level::INFO => "INF",
        Level::DEBUG => "DBG",
        _ => "TRC",
    }
}

fn paint(level: &Level, label: &str) -> ColoredString {
    match *level {
        Level::ERROR => label.red().bold(),
        Level::WARN => label.yellow().bold(),
        Level::INFO => label.green(),
        Level::DEBUG => label.blue(),
        _ => label.magenta(),
    }
}

impl Handler for DevHandler {
    fn enabled(&self, _ctx: Option<&Context>, level: &Level) -> bool {
        self.opts.level.enabled(level)
    }

    fn handle(&self, _ctx: Option<&Context>, record: Record) -> Result<(), HandlerError> {
        let line = self.encode(&record);
        self.stream.write_line(line.into_bytes())?;
        Ok(())
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> SharedHandler {
        Arc::new(Self {
            attrs: self.attrs.with_attrs(&attrs),
            ..self.clone()
        })
    }

    fn with_group(&self, name: &str) -> SharedHandler {
        Arc::new(Self {
            attrs: self.attrs.with_group(name),
            ..self.clone()
        })
    }
}

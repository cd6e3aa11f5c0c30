//! Command execution.

use crate::{Commands, ValueKind};
use colored::Colorize;
use ntsync_client::{Client, EntrySnapshot};
use ntsync_protocol::EntryValue;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Get { key } => {
            let value = client.get_value(&key)?;
            Ok(format_value(&value))
        }

        Commands::Keys { prefix } => {
            let keys = client.keys(&prefix);
            if keys.is_empty() {
                return Ok("No keys".yellow().to_string());
            }
            Ok(keys.join("\n"))
        }

        Commands::Dump { prefix, json } => {
            let snapshot = client.snapshot(&prefix);
            if json {
                return Ok(serde_json::to_string_pretty(&snapshot)?);
            }
            if snapshot.is_empty() {
                return Ok("No entries".yellow().to_string());
            }
            Ok(format_snapshot(&snapshot))
        }

        Commands::Put {
            key,
            value,
            kind,
            persistent,
        } => {
            let value = parse_value(&value, kind)?;
            let created = !client.contains_key(&key);
            client.put(&key, value).await?;
            if persistent {
                client.set_persistent(&key, true).await?;
            }

            let verb = if created {
                "Created".green()
            } else {
                "Updated".green()
            };
            Ok(format!("{} {}", verb, key.cyan()))
        }

        Commands::Delete { key } => {
            client.delete(&key).await?;
            Ok(format!("{} {}", "Deleted".green(), key.cyan()))
        }

        Commands::ClearAll => {
            let count = client.keys("").len();
            client.clear_all().await?;
            Ok(format!("{} {} entries", "Cleared".green(), count))
        }
    }
}

/// Parses a command-line value as the requested type.
pub fn parse_value(input: &str, kind: ValueKind) -> Result<EntryValue, String> {
    fn items(input: &str) -> impl Iterator<Item = &str> {
        input
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
    }

    fn parse_bool(input: &str) -> Result<bool, String> {
        match input.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(format!("invalid boolean: {}", other)),
        }
    }

    fn parse_double(input: &str) -> Result<f64, String> {
        input
            .parse()
            .map_err(|_| format!("invalid number: {}", input))
    }

    let value = match kind {
        ValueKind::Bool => EntryValue::Boolean(parse_bool(input.trim())?),
        ValueKind::Double => EntryValue::Double(parse_double(input.trim())?),
        ValueKind::String => EntryValue::String(input.to_string()),
        ValueKind::BoolArray => {
            EntryValue::BooleanArray(items(input).map(parse_bool).collect::<Result<_, _>>()?)
        }
        ValueKind::DoubleArray => {
            EntryValue::DoubleArray(items(input).map(parse_double).collect::<Result<_, _>>()?)
        }
        ValueKind::StringArray => {
            EntryValue::StringArray(items(input).map(str::to_string).collect())
        }
    };
    Ok(value)
}

fn format_value(value: &EntryValue) -> String {
    match value {
        EntryValue::Boolean(v) => v.to_string(),
        EntryValue::Double(v) => v.to_string(),
        EntryValue::String(v) => v.clone(),
        EntryValue::Raw(v) | EntryValue::RpcDefinition(v) => format!("<{} bytes>", v.len()),
        EntryValue::BooleanArray(v) => format!("{:?}", v),
        EntryValue::DoubleArray(v) => format!("{:?}", v),
        EntryValue::StringArray(v) => format!("{:?}", v),
    }
}

fn format_snapshot(snapshot: &[EntrySnapshot]) -> String {
    let width = snapshot.iter().map(|s| s.name.len()).max().unwrap_or(0);

    snapshot
        .iter()
        .map(|s| {
            format!(
                "{}  {}  {}",
                format!("{:<width$}", s.name, width = width).cyan(),
                format!("{:<9}", s.entry_type.name()).dimmed(),
                format_value(&s.value)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

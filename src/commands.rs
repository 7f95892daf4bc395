//! Command execution.

use crate::config::Config;
use crate::Commands;
use colored::Colorize;
use serde_json::{Map, Value};
use statebind_core::{Event, Machine, Service};
use std::path::Path;

/// Executes a one-shot command and returns the formatted output.
pub fn execute(cmd: Commands, config: &Config) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl { .. } => unreachable!(),

        Commands::Inspect => {
            let machine = load_machine(config.machine_path()?)?;
            Ok(inspect(&machine))
        }

        Commands::Run {
            events,
            context,
            props,
            no_start,
        } => {
            let machine = load_machine(config.machine_path()?)?;
            let service = build_service(machine, context.as_deref(), props.as_deref())?;
            if config.runner.auto_start && !no_start {
                service.start();
            }
            for arg in &events {
                let event = parse_event(arg)?;
                tracing::info!(event = %event.event_type, "dispatching");
                service.send(event);
            }
            Ok(describe(&service, config.runner.print_context))
        }

        Commands::Validate { files } => {
            let files = if files.is_empty() {
                vec![config.machine_path()?.to_path_buf()]
            } else {
                files
            };

            let mut output = Vec::new();
            for path in &files {
                let machine = load_machine(path)
                    .map_err(|e| format!("{}: {}", path.display(), e))?;
                output.push(format!(
                    "{} {} ({} states, checksum {})",
                    "Valid".green(),
                    path.display().to_string().cyan(),
                    machine.definition().states.len(),
                    machine.checksum()
                ));
            }
            Ok(output.join("\n"))
        }
    }
}

/// Reads a machine definition file. `.yaml`/`.yml` files are parsed as YAML,
/// everything else as JSON.
pub fn load_definition(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        Ok(serde_yaml::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(&content)?)
    }
}

/// Loads and validates a machine from a definition file.
pub fn load_machine(path: &Path) -> Result<Machine, Box<dyn std::error::Error>> {
    let definition = load_definition(path)?;
    let machine = Machine::from_json(&definition)?;
    tracing::debug!(path = %path.display(), checksum = machine.checksum(), "machine loaded");
    Ok(machine)
}

/// Builds a service with optional JSON context and props (inline or `@file`).
pub fn build_service(
    machine: Machine,
    context: Option<&str>,
    props: Option<&str>,
) -> Result<Service, Box<dyn std::error::Error>> {
    let mut builder = Service::builder(machine);
    if let Some(arg) = context {
        builder = builder.context(parse_object_arg(arg, "context")?);
    }
    if let Some(arg) = props {
        builder = builder.props(parse_object_arg(arg, "props")?);
    }
    Ok(builder.build()?)
}

/// Parses `TYPE` or `TYPE={json payload}`.
pub fn parse_event(arg: &str) -> Result<Event, Box<dyn std::error::Error>> {
    match arg.split_once('=') {
        Some((event_type, payload)) if !event_type.is_empty() => {
            Ok(Event::with_payload(event_type, serde_json::from_str(payload)?))
        }
        Some(_) => Err(format!("missing event type in '{}'", arg).into()),
        None if arg.is_empty() => Err("empty event type".into()),
        None => Ok(Event::new(arg)),
    }
}

/// Parses a JSON argument, reading from a file when prefixed with `@`.
pub fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

fn parse_object_arg(
    arg: &str,
    what: &str,
) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    match parse_json_arg(arg)? {
        Value::Object(map) => Ok(map),
        other => Err(format!("{} must be a JSON object, got {}", what, other).into()),
    }
}

/// Summarises states, events and tags of a machine.
pub fn inspect(machine: &Machine) -> String {
    let def = machine.definition();
    let mut output = format!(
        "{} (checksum: {})\n  initial: {}\n  states:\n",
        format!("Machine {}", machine.id().unwrap_or("<anonymous>").cyan()).bold(),
        machine.checksum(),
        def.initial.yellow()
    );

    for (name, node) in &def.states {
        let tags = def
            .tags
            .get(name)
            .map(|t| t.iter().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        let events = def.events_from(name).join(", ");
        output.push_str(&format!("    {}", name.yellow()));
        if !tags.is_empty() {
            output.push_str(&format!(" [{}]", tags));
        }
        if !events.is_empty() {
            output.push_str(&format!(" on: {}", events));
        }
        if def.eventless(name).is_some() {
            output.push_str(&format!(" {}", "(eventless)".dimmed()));
        }
        if !node.effects.is_empty() {
            output.push_str(&format!(" effects: {}", node.effects.len()));
        }
        output.push('\n');
    }

    if !def.on.is_empty() {
        let global: Vec<&str> = def.on.keys().map(String::as_str).collect();
        output.push_str(&format!("  global: {}\n", global.join(", ")));
    }

    let computed = machine.computed_keys();
    if !computed.is_empty() {
        output.push_str(&format!("  computed: {}\n", computed.join(", ")));
    }

    output.trim_end().to_string()
}

/// Current state, tags and optionally context and computed values.
pub fn describe(service: &Service, with_context: bool) -> String {
    let state = service.state();
    let mut output = format!("{}: {}", "State".bold(), state.value().yellow());

    let tags = state.tags();
    if !tags.is_empty() {
        output.push_str(&format!(" [{}]", tags.join(", ")));
    }

    if with_context {
        output.push_str(&format!(
            "\n{}: {}",
            "Context".bold(),
            format_json(&service.context().snapshot())
        ));
        let computed = service.computed().snapshot();
        if !computed.is_empty() {
            output.push_str(&format!(
                "\n{}: {}",
                "Computed".bold(),
                format_json(&Value::Object(computed))
            ));
        }
    }
    output
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

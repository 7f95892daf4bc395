//! Interactive REPL.

use crate::commands::{describe, format_json, parse_json_arg};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Value;
use statebind_core::{Event, Service};
use std::path::Path;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help

  send <TYPE> [payload_json]    Send an event
  state                         Show current state and status
  context                       Show context values
  computed                      Show computed values
  set <key> <json>              Write a context value
  tags                          Show tags of the current state
  events                        List events accepted in the current state

  start                         Start the service
  stop                          Stop the service

  quit, exit                    Exit the REPL
"#;

pub fn run(service: Service, history_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let name = service.machine().id().unwrap_or("machine").to_string();
    println!("{} {}", "statebind".bold().cyan(), name.cyan());
    println!("{}", describe(&service, false));

    // Print every commit as it happens, including ones caused by queued events.
    let _transitions = service.subscribe(|state| {
        println!("  {} {}", "→".dimmed(), state.yellow());
    });

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;
    let _ = rl.load_history(history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", format!("{}>", name).cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&service, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(history_path);
    service.stop();
    println!("{}", "Stopped.".dimmed());

    Ok(())
}

fn execute_repl_command(
    service: &Service,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "send" | "s" => {
            let Some(event_type) = args.first() else {
                return Ok(Some("Usage: send <TYPE> [payload_json]".to_string()));
            };
            let event = match args.get(1..).filter(|rest| !rest.is_empty()) {
                Some(rest) => Event::with_payload(*event_type, parse_json_arg(&rest.join(" "))?),
                None => Event::new(*event_type),
            };

            let from = service.get_snapshot();
            service.send(event);
            let to = service.get_snapshot();
            if from == to {
                Ok(Some(format!("{} (state: {})", event_type.cyan(), to.yellow())))
            } else {
                Ok(Some(format!("{} {} → {}", event_type.cyan(), from, to.yellow())))
            }
        }

        "state" => Ok(Some(format!(
            "{} ({})",
            describe(service, false),
            format!("{:?}", service.status()).dimmed()
        ))),

        "context" | "ctx" => Ok(Some(format_json(&service.context().snapshot()))),

        "computed" => Ok(Some(format_json(&Value::Object(
            service.computed().snapshot(),
        )))),

        "set" => {
            if args.len() < 2 {
                return Ok(Some("Usage: set <key> <json>".to_string()));
            }
            let key = args[0];
            if !service.context().contains(key) {
                return Ok(Some(format!("Unknown context key: {}", key.red())));
            }
            let value: Value = serde_json::from_str(&args[1..].join(" "))?;
            service.context().set(key, value);
            Ok(Some(format!(
                "{} {} = {}",
                "Set".green(),
                key.cyan(),
                service.context().hash(key)
            )))
        }

        "tags" => {
            let tags = service.state().tags();
            if tags.is_empty() {
                Ok(Some("No tags".yellow().to_string()))
            } else {
                Ok(Some(tags.join(", ")))
            }
        }

        "events" => {
            let state = service.get_snapshot();
            let events = service.machine().definition().events_from(&state).join(", ");
            if events.is_empty() {
                Ok(Some("No events".yellow().to_string()))
            } else {
                Ok(Some(events))
            }
        }

        "start" => {
            service.start();
            Ok(Some(format!(
                "{} (state: {})",
                format!("{:?}", service.status()).green(),
                service.get_snapshot().yellow()
            )))
        }

        "stop" => {
            service.stop();
            Ok(Some(format!("{:?}", service.status()).yellow().to_string()))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

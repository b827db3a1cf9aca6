use crate::api::ChecklistStore;
use crate::checklist::{normalize_checked, AuditObserver, ChecklistService, ToggleError, ToggleRequest};
use crate::config::ChecklistConfig;
use crate::database::models::{ChecklistColumn, ChecklistState};
use crate::database::store::{InsertObserver, Observers, RecordStore, Scalar, SqliteRecordStore};
use crate::database::Database;
use anyhow::{anyhow, Context, Result};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Run the interactive shell for inspecting and toggling checklist state.
pub async fn run_cli(config: ChecklistConfig, database: Database) -> Result<()> {
    let observers = Observers::new(vec![
        Arc::new(AuditObserver) as Arc<dyn InsertObserver<ChecklistState>>
    ]);
    let mut session = CliSession {
        blog_id: config.blog_id,
        checklist: ChecklistService::new(SqliteRecordStore::with_observers(database, observers)),
    };

    println!("Checklist CLI ready (blog {}). Type 'help' for a list of commands.", session.blog_id);

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        print!("checklist> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            println!("Exiting");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens = match shell_words::split(trimmed) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => continue,
            Err(err) => {
                println!("Unable to parse command: {err}");
                continue;
            }
        };

        match session.handle_command(&tokens) {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Exit) => break,
            Err(err) => {
                println!("Error: {err:#}");
            }
        }
    }

    Ok(())
}

struct CliSession {
    blog_id: i64,
    checklist: ChecklistService<ChecklistStore>,
}

#[derive(Debug, PartialEq, Eq)]
enum LoopAction {
    Continue,
    Exit,
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .with_context(|| format!("'{raw}' is not an integer"))
}

/// Parses `column=value` into a whitelisted column and a scalar.
fn parse_condition(raw: &str) -> Result<(ChecklistColumn, Scalar)> {
    let (column, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected column=value, got '{raw}'"))?;
    let column: ChecklistColumn = column.parse()?;
    Ok((column, Scalar::from(value)))
}

impl CliSession {
    fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        let store = self.checklist.store();
        match tokens[0].as_str() {
            "help" => {
                self.print_help();
            }
            "toggle" => {
                if tokens.len() < 5 {
                    println!("Usage: toggle <user_id> <post_id> <field> <true|false>");
                    return Ok(LoopAction::Continue);
                }
                let request = ToggleRequest {
                    user_id: parse_id(&tokens[1])?,
                    post_id: parse_id(&tokens[2])?,
                    blog_id: self.blog_id,
                    field: tokens[3].clone(),
                    checked: normalize_checked(&tokens[4]).to_string(),
                };
                match self.checklist.toggle(&request) {
                    Ok(outcome) => println!("ok ({outcome:?})"),
                    Err(ToggleError::Invalid) => println!("rejected: incomplete request"),
                    Err(ToggleError::NotOwner) => println!("rejected: item owned by another user"),
                    Err(err) => return Err(err.into()),
                }
            }
            "status" => {
                if tokens.len() < 3 {
                    println!("Usage: status <post_id> <field>");
                    return Ok(LoopAction::Continue);
                }
                let post_id = parse_id(&tokens[1])?;
                match self.checklist.state(post_id, self.blog_id, &tokens[2])? {
                    Some(state) => print_state(&state),
                    None => println!("(no state recorded)"),
                }
            }
            "get" => {
                if tokens.len() < 2 {
                    println!("Usage: get <id>");
                    return Ok(LoopAction::Continue);
                }
                print_optional(store.get_one(Scalar::from(tokens[1].as_str()))?);
            }
            "by" => {
                if tokens.len() < 3 {
                    println!("Usage: by <column> <value>");
                    return Ok(LoopAction::Continue);
                }
                let column: ChecklistColumn = tokens[1].parse()?;
                print_optional(store.get_one_by(column, Scalar::from(tokens[2].as_str()))?);
            }
            "column" => {
                if tokens.len() < 3 {
                    println!("Usage: column <column> <id> | column <column> <where_column> <value>");
                    return Ok(LoopAction::Continue);
                }
                let column: ChecklistColumn = tokens[1].parse()?;
                let value = if tokens.len() >= 4 {
                    let where_column: ChecklistColumn = tokens[2].parse()?;
                    store.get_scalar_by(column, where_column, Scalar::from(tokens[3].as_str()))?
                } else {
                    store.get_scalar(column, Scalar::from(tokens[2].as_str()))?
                };
                match value {
                    Some(value) => println!("{column} = {value}"),
                    None => println!("(not found)"),
                }
            }
            "find" => {
                let conditions = tokens[1..]
                    .iter()
                    .map(|raw| parse_condition(raw))
                    .collect::<Result<Vec<_>>>()?;
                print_optional(store.find_matching(&conditions)?);
            }
            "delete" => {
                if tokens.len() < 2 {
                    println!("Usage: delete <id>");
                    return Ok(LoopAction::Continue);
                }
                let outcome = store.delete(parse_id(&tokens[1])?)?;
                println!("{outcome:?}");
            }
            "tables" => {
                let name = tokens.get(1).map(String::as_str).unwrap_or("checklist_states");
                println!("{name}: {}", if store.table_exists(name)? { "present" } else { "missing" });
            }
            "clear" => {
                print!("\x1B[2J\x1B[1;1H");
            }
            "quit" | "exit" => return Ok(LoopAction::Exit),
            other => {
                println!("Unknown command '{other}'. Type 'help' for a list of commands.");
            }
        }
        Ok(LoopAction::Continue)
    }

    fn print_help(&self) {
        println!("Available commands:");
        println!("  toggle USER POST FIELD CHECKED   Set an item's state as USER");
        println!("  status POST FIELD                Show the stored state of an item");
        println!("  get ID                           Show a record by id");
        println!("  by COLUMN VALUE                  Show the first record with COLUMN = VALUE");
        println!("  column COLUMN ID                 Show one column of a record");
        println!("  column COLUMN WHERE VALUE        Show one column, matched on another");
        println!("  find COL=VAL [COL=VAL ...]       Show the first record matching all pairs");
        println!("  delete ID                        Delete a record");
        println!("  tables [NAME]                    Check whether a table exists");
        println!("  clear                            Clear the screen");
        println!("  exit                             Quit the CLI");
    }
}

fn print_state(state: &ChecklistState) {
    println!(
        "  [{}] post {} blog {} field {} checked={} owner={} created {}",
        state.id,
        state.post_id,
        state.blog_id,
        state.field,
        state.checked,
        state.user_id,
        state.created_at
    );
}

fn print_optional(state: Option<ChecklistState>) {
    match state {
        Some(state) => print_state(&state),
        None => println!("(not found)"),
    }
}

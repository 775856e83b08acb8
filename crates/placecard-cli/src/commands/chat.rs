use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use placecard_core::models::{CompanyRecord, Operator, OperatorId, Permissions, RecordId};
use placecard_core::store::{
    FileStore, MemoryFileStore, MemoryRecordStore, R2Config, R2FileStore, RecordStore,
    SheetsConfig, SheetsRecordStore,
};
use placecard_core::transport::{
    Attachment, Command, Outbound, OperatorEvent, OutboundMessage, Payload, TransportError,
    CANCEL_CHOICE, CONFIRM_CHOICE, RETRY_CHOICE,
};
use placecard_core::validate::ValidationRules;
use placecard_core::SessionManager;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::CliError;
use crate::settings::load_engine_config;

pub const HELP: &str = "\
/edit <record id>      start editing a record
/find <name>           start editing the record with this name
/unfilled              list records with blank fields
/field <name>          pick a field (or just type its name)
/photo <path> [slot]   attach an image, optionally replacing slot N
/show                  show the card with staged changes
/confirm               save staged changes
/retry                 retry after a conflict
/cancel                drop the session
/quit                  leave
Anything else is sent as a value.";

pub struct ChatOptions {
    pub operator: i64,
    pub name: Option<String>,
    pub seed: Option<PathBuf>,
    pub admin: bool,
    pub allowed: Vec<String>,
}

/// One parsed line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Payload(Payload),
    Photo { path: PathBuf, slot: Option<usize> },
    Help,
    Quit,
}

pub async fn run_chat(options: ChatOptions, config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_engine_config(config_path)?;
    let operator = build_operator(&options)?;
    let records = record_store(options.seed.as_deref(), &config.validation)?;
    let files = file_store()?;

    let manager = Arc::new(SessionManager::new(
        records,
        files,
        Arc::new(StdoutOutbound),
        &config,
    ));
    let reaper = manager.clone().spawn_reaper(config.reaper_interval());

    println!(
        "Acting as {} ({}). Type /help for commands.",
        operator.display_name, operator.id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_line(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(error) => {
                eprintln!("{error}");
                continue;
            }
        };

        let payload = match input {
            ChatInput::Quit => break,
            ChatInput::Help => {
                println!("{HELP}");
                continue;
            }
            ChatInput::Payload(payload) => payload,
            ChatInput::Photo { path, slot } => match tokio::fs::read(&path).await {
                Ok(bytes) => Payload::Attachment(Attachment { bytes, slot }),
                Err(error) => {
                    eprintln!("Could not read {}: {error}", path.display());
                    continue;
                }
            },
        };

        // Rejections are already reported to the operator as messages.
        if let Err(error) = manager
            .on_operator_event(OperatorEvent::new(operator.clone(), payload))
            .await
        {
            tracing::debug!(code = error.code(), "Input rejected");
        }
    }

    reaper.abort();
    Ok(())
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ChatInput>, CliError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(ChatInput::Payload(Payload::Text(line.to_string()))));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));

    let input = match name.to_ascii_lowercase().as_str() {
        "edit" => {
            if rest.is_empty() {
                return Err(CliError::Usage("/edit <record id>"));
            }
            ChatInput::Payload(Payload::Command(Command::Edit(RecordId::new(rest)?)))
        }
        "find" => {
            if rest.is_empty() {
                return Err(CliError::Usage("/find <name>"));
            }
            ChatInput::Payload(Payload::Command(Command::Find(rest.to_string())))
        }
        "unfilled" => ChatInput::Payload(Payload::Command(Command::Unfilled)),
        "field" => {
            if rest.is_empty() {
                return Err(CliError::Usage("/field <name>"));
            }
            ChatInput::Payload(Payload::Text(rest.to_string()))
        }
        "photo" => parse_photo(rest)?,
        "confirm" => ChatInput::Payload(Payload::Command(Command::Confirm)),
        "cancel" => ChatInput::Payload(Payload::Command(Command::Cancel)),
        "retry" => ChatInput::Payload(Payload::Command(Command::Retry)),
        "show" => ChatInput::Payload(Payload::Command(Command::Show)),
        "help" => ChatInput::Help,
        "quit" | "exit" => ChatInput::Quit,
        _ => return Err(CliError::UnknownCommand(format!("/{name}"))),
    };
    Ok(Some(input))
}

fn parse_photo(rest: &str) -> Result<ChatInput, CliError> {
    const USAGE: &str = "/photo <path> [slot]";

    let mut parts = rest.split_whitespace();
    let path = parts.next().ok_or(CliError::Usage(USAGE))?;
    let slot = parts
        .next()
        .map(|raw| raw.parse::<usize>().map_err(|_| CliError::Usage(USAGE)))
        .transpose()?;
    if parts.next().is_some() {
        return Err(CliError::Usage(USAGE));
    }
    Ok(ChatInput::Photo {
        path: PathBuf::from(path),
        slot,
    })
}

pub fn build_operator(options: &ChatOptions) -> Result<Operator, CliError> {
    let permissions = if options.admin {
        Permissions::All
    } else if options.allowed.is_empty() {
        tracing::warn!("Operator has no editable records; pass --admin or --allow");
        Permissions::None
    } else {
        let records = options
            .allowed
            .iter()
            .map(|id| RecordId::new(id.as_str()))
            .collect::<placecard_core::Result<BTreeSet<_>>>()?;
        Permissions::Records(records)
    };

    let id = OperatorId::new(options.operator);
    let name = options
        .name
        .clone()
        .unwrap_or_else(|| format!("operator {id}"));
    Ok(Operator::new(id, name, permissions))
}

fn record_store(
    seed: Option<&Path>,
    rules: &ValidationRules,
) -> Result<Arc<dyn RecordStore>, CliError> {
    if let Some(config) = SheetsConfig::from_env()? {
        tracing::info!("Using Google Sheets record store");
        return Ok(Arc::new(SheetsRecordStore::new(config, rules.clone())?));
    }

    let path = seed.ok_or(CliError::NoRecordStore)?;
    let records = load_seed(path)?;
    tracing::info!(records = records.len(), "Using in-memory record store");
    Ok(Arc::new(MemoryRecordStore::with_records(records)))
}

fn file_store() -> Result<Arc<dyn FileStore>, CliError> {
    if let Some(config) = R2Config::from_env()? {
        tracing::info!(bucket = %config.bucket, "Using R2 photo store");
        return Ok(Arc::new(R2FileStore::new(config)));
    }
    tracing::info!("Using in-memory photo store");
    Ok(Arc::new(MemoryFileStore::new()))
}

pub fn load_seed(path: &Path) -> Result<Vec<CompanyRecord>, CliError> {
    let raw = std::fs::read_to_string(path)?;
    parse_seed(&raw)
}

/// Parse a JSON array of records, rejecting invalid or duplicate ones.
pub fn parse_seed(raw: &str) -> Result<Vec<CompanyRecord>, CliError> {
    let records: Vec<CompanyRecord> = serde_json::from_str(raw)?;
    let mut seen = BTreeSet::new();
    for record in &records {
        record.check()?;
        if !seen.insert(&record.id) {
            return Err(CliError::Config(format!(
                "Duplicate record id in seed: {}",
                record.id
            )));
        }
    }
    Ok(records)
}

/// Prints outbound messages to stdout. Choices that map to chat commands
/// are shown with their slash; the rest are typed as plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutOutbound;

#[async_trait]
impl Outbound for StdoutOutbound {
    async fn send(
        &self,
        operator: &OperatorId,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", format_message(*operator, &message))
            .map_err(|error| TransportError::Failed(error.to_string()))
    }
}

pub fn format_message(operator: OperatorId, message: &OutboundMessage) -> String {
    let mut lines = vec![format!("[to {operator}]")];
    lines.extend(message.text.lines().map(|line| format!("  {line}")));
    if !message.choices.is_empty() {
        let choices = message
            .choices
            .iter()
            .map(|choice| match choice.value.as_str() {
                CONFIRM_CHOICE | CANCEL_CHOICE | RETRY_CHOICE => format!("/{}", choice.value),
                value => format!("{value} ({})", choice.label),
            })
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(format!("  > {choices}"));
    }
    lines.join("\n")
}

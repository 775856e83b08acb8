//! Google Sheets record store over the values API.
//!
//! The first row is a header naming the columns. Record fields are matched
//! by key, label or alias (`type`, `google_map`, `phone_numbers`, ...); the
//! `ID` column identifies rows and an optional `version` column carries the
//! concurrency token. Columns the store does not know are preserved.
//!
//! The values API has no conditional update, so writes are read, compare,
//! then write and the store reports itself as non-atomic.

use std::collections::BTreeMap;
use std::env;
use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::models::{
    AssetRef, Category, CompanyRecord, FieldKind, FieldValue, RecordId, RecordVersion, Snapshot,
};
use crate::util::{excerpt, is_http_url, non_blank};
use crate::validate::{self, ValidationRules};
use crate::{Error, Result};

use super::{RecordStore, StoreError, StoreResult, WriteOutcome};

const ENV_SPREADSHEET_ID: &str = "SHEETS_SPREADSHEET_ID";
const ENV_SHEET_NAME: &str = "SHEETS_SHEET_NAME";
const ENV_ACCESS_TOKEN: &str = "SHEETS_ACCESS_TOKEN";
const ENV_API_BASE: &str = "SHEETS_API_BASE";

const DEFAULT_SHEET_NAME: &str = "Sheet1";
const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";

const ID_HEADER: &str = "id";
const VERSION_HEADER: &str = "version";

/// Google Sheets connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// OAuth bearer token with the spreadsheets scope.
    pub access_token: String,
    pub api_base: String,
}

impl fmt::Debug for SheetsConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SheetsConfig")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("sheet_name", &self.sheet_name)
            .field("access_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl SheetsConfig {
    /// Load Sheets configuration from environment variables.
    ///
    /// Returns `Ok(None)` when neither the spreadsheet id nor the token is
    /// set, and an error when only one of them is.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<SheetsConfig>> {
    let value = |key: &str| non_blank(lookup(key));
    let spreadsheet_id = value(ENV_SPREADSHEET_ID);
    let access_token = value(ENV_ACCESS_TOKEN);

    let (spreadsheet_id, access_token) = match (spreadsheet_id, access_token) {
        (None, None) => return Ok(None),
        (Some(spreadsheet_id), Some(access_token)) => (spreadsheet_id, access_token),
        (None, Some(_)) => {
            return Err(Error::Config(format!(
                "Sheets configuration is incomplete. Missing: {ENV_SPREADSHEET_ID}"
            )))
        }
        (Some(_), None) => {
            return Err(Error::Config(format!(
                "Sheets configuration is incomplete. Missing: {ENV_ACCESS_TOKEN}"
            )))
        }
    };

    let api_base = value(ENV_API_BASE).unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    if !is_http_url(&api_base) {
        return Err(Error::Config(format!(
            "{ENV_API_BASE} must start with http:// or https://"
        )));
    }

    Ok(Some(SheetsConfig {
        spreadsheet_id,
        sheet_name: value(ENV_SHEET_NAME).unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
        access_token,
        api_base: api_base.trim_end_matches('/').to_string(),
    }))
}

/// Position of each known column in the header row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnMap {
    id: usize,
    version: Option<usize>,
    fields: BTreeMap<FieldKind, usize>,
    width: usize,
}

impl ColumnMap {
    fn from_header(header: &[String]) -> StoreResult<Self> {
        let mut id = None;
        let mut version = None;
        let mut fields = BTreeMap::new();

        for (index, cell) in header.iter().enumerate() {
            let name = cell.trim();
            if name.eq_ignore_ascii_case(ID_HEADER) {
                id.get_or_insert(index);
            } else if name.eq_ignore_ascii_case(VERSION_HEADER) {
                version.get_or_insert(index);
            } else if let Some(kind) = FieldKind::parse(name) {
                fields.entry(kind).or_insert(index);
            }
        }

        let id = id.ok_or_else(|| StoreError::Malformed("sheet has no ID column".to_string()))?;
        if !fields.contains_key(&FieldKind::Name) {
            return Err(StoreError::Malformed("sheet has no name column".to_string()));
        }

        Ok(Self {
            id,
            version,
            fields,
            width: header.len(),
        })
    }
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map_or("", |value| value.trim())
}

fn row_to_snapshot(
    columns: &ColumnMap,
    row: &[String],
    rules: &ValidationRules,
) -> StoreResult<Snapshot> {
    let id = RecordId::new(cell(row, columns.id))
        .map_err(|error| StoreError::Malformed(error.to_string()))?;
    let malformed = |kind: FieldKind, error: &dyn fmt::Display| {
        StoreError::Malformed(format!("{id} column {}: {error}", kind.key()))
    };

    let name_column = columns.fields[&FieldKind::Name];
    let mut record = CompanyRecord::new(id.clone(), cell(row, name_column))
        .map_err(|error| malformed(FieldKind::Name, &error))?;

    for (&kind, &index) in &columns.fields {
        let text = cell(row, index);
        if kind == FieldKind::Name || text.is_empty() {
            continue;
        }
        let value =
            validate::validate(kind, text, rules).map_err(|error| malformed(kind, &error))?;
        record.set(value);
    }

    let version = match columns.version.map(|index| cell(row, index)) {
        None | Some("") => RecordVersion::INITIAL,
        Some(text) => text.parse().map(RecordVersion::new).map_err(|_| {
            StoreError::Malformed(format!("{id} has an invalid version: {}", excerpt(text)))
        })?,
    };

    Ok(Snapshot::new(record, version))
}

fn field_cell(value: &FieldValue) -> String {
    fn text<T: ToString>(value: Option<&T>) -> String {
        value.map(ToString::to_string).unwrap_or_default()
    }

    match value {
        FieldValue::Name(name) => name.clone(),
        FieldValue::Category(category) => text(category.map(Category::label).as_ref()),
        FieldValue::Photos(photos) => photos
            .iter()
            .map(AssetRef::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        FieldValue::MapLink(link) => text(link.as_ref()),
        FieldValue::Phone(phone) => text(phone.as_ref()),
        FieldValue::Messaging(handle) => text(handle.as_ref()),
        FieldValue::Hours(hours) => text(hours.as_ref()),
    }
}

/// Row values for `record`, keeping cells of unknown columns from `existing`.
fn record_to_row(
    columns: &ColumnMap,
    record: &CompanyRecord,
    version: RecordVersion,
    existing: &[String],
) -> Vec<String> {
    let mut row: Vec<String> = (0..columns.width)
        .map(|index| existing.get(index).cloned().unwrap_or_default())
        .collect();
    row[columns.id] = record.id.to_string();
    for (&kind, &index) in &columns.fields {
        row[index] = field_cell(&record.get(kind));
    }
    if let Some(index) = columns.version {
        row[index] = version.get().to_string();
    }
    row
}

/// Column letter for a zero-based index: 0 is `A`, 26 is `AA`.
fn column_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut remaining = index + 1;
    while remaining > 0 {
        let offset = (remaining - 1) % 26;
        letters.push(char::from(b'A' + u8::try_from(offset).unwrap_or(0)));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn quoted_sheet(sheet_name: &str) -> String {
    format!("'{}'", sheet_name.replace('\'', "''"))
}

/// A1 range covering one sheet row (1-based) across `width` columns.
fn row_range(sheet_name: &str, row_number: usize, width: usize) -> String {
    format!(
        "{}!A{row_number}:{}{row_number}",
        quoted_sheet(sheet_name),
        column_letter(width.saturating_sub(1))
    )
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    status: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(ApiErrorBody {
        error: Some(detail),
    }) = serde_json::from_str::<ApiErrorBody>(body)
    {
        if let Some(message) = detail.message.or(detail.status) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = excerpt(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn status_error(status: StatusCode, body: &str) -> StoreError {
    let message = parse_api_error(status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StoreError::Unavailable(message)
    } else {
        StoreError::Rejected(message)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn http_error(error: reqwest::Error) -> StoreError {
    StoreError::Unavailable(format!("Sheets request failed: {error}"))
}

/// The whole sheet as read in one request.
struct SheetTable {
    columns: ColumnMap,
    /// Data rows; `rows[i]` is sheet row `i + 2`.
    rows: Vec<Vec<String>>,
}

impl SheetTable {
    fn from_values(mut values: Vec<Vec<String>>) -> StoreResult<Self> {
        if values.is_empty() {
            return Err(StoreError::Malformed("sheet is empty".to_string()));
        }
        let header = values.remove(0);
        Ok(Self {
            columns: ColumnMap::from_header(&header)?,
            rows: values,
        })
    }

    /// Sheet row number and cells of the row holding `id`.
    fn find(&self, id: &RecordId) -> Option<(usize, &[String])> {
        self.rows
            .iter()
            .position(|row| cell(row, self.columns.id) == id.as_str())
            .map(|index| (index + 2, self.rows[index].as_slice()))
    }

    /// Every readable record. Rows without an id are skipped, malformed rows
    /// are logged and skipped.
    fn records(&self, rules: &ValidationRules) -> Vec<CompanyRecord> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !cell(row, self.columns.id).is_empty())
            .filter_map(|(index, row)| match row_to_snapshot(&self.columns, row, rules) {
                Ok(snapshot) => Some(snapshot.record),
                Err(error) => {
                    tracing::warn!(row = index + 2, error = %error, "Skipping unreadable sheet row");
                    None
                }
            })
            .collect()
    }
}

/// Record store backed by one Google Sheets tab.
#[derive(Clone, Debug)]
pub struct SheetsRecordStore {
    config: SheetsConfig,
    rules: ValidationRules,
    client: reqwest::Client,
}

impl SheetsRecordStore {
    pub fn new(config: SheetsConfig, rules: ValidationRules) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Config(format!("Failed to build HTTP client: {error}")))?;
        Ok(Self {
            config,
            rules,
            client,
        })
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.config.api_base,
            urlencoding::encode(&self.config.spreadsheet_id),
            urlencoding::encode(range)
        )
    }

    async fn read_table(&self) -> StoreResult<SheetTable> {
        let response = self
            .client
            .get(self.values_url(&quoted_sheet(&self.config.sheet_name)))
            .bearer_auth(&self.config.access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let payload = response
            .json::<ValueRange>()
            .await
            .map_err(|error| StoreError::Malformed(format!("invalid values payload: {error}")))?;
        SheetTable::from_values(payload.values)
    }

    async fn write_row(&self, range: &str, row: Vec<String>) -> StoreResult<()> {
        let body = serde_json::json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [row],
        });
        let response = self
            .client
            .put(self.values_url(range))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SheetsRecordStore {
    async fn fetch(&self, id: &RecordId) -> StoreResult<Snapshot> {
        let table = self.read_table().await?;
        let (row_number, row) = table
            .find(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        tracing::debug!(record_id = %id, row = row_number, "Read record from sheet");
        row_to_snapshot(&table.columns, row, &self.rules)
    }

    async fn write(
        &self,
        id: &RecordId,
        record: &CompanyRecord,
        expected: RecordVersion,
    ) -> StoreResult<WriteOutcome> {
        let table = self.read_table().await?;
        if table.columns.version.is_none() {
            return Err(StoreError::Rejected(
                "sheet has no version column; add one before editing".to_string(),
            ));
        }
        let (row_number, row) = table
            .find(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let current = row_to_snapshot(&table.columns, row, &self.rules)?.version;
        if current != expected {
            return Ok(WriteOutcome::VersionMismatch(current));
        }

        let version = expected.next();
        let values = record_to_row(&table.columns, record, version, row);
        let range = row_range(&self.config.sheet_name, row_number, table.columns.width);
        self.write_row(&range, values).await?;

        tracing::info!(record_id = %id, row = row_number, %version, "Wrote record to sheet");
        Ok(WriteOutcome::Written(version))
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Vec<CompanyRecord>> {
        let table = self.read_table().await?;
        let found: Vec<_> = table
            .records(&self.rules)
            .into_iter()
            .filter(|record| record.name_matches(name))
            .collect();
        tracing::debug!(name, matches = found.len(), "Searched sheet by name");
        Ok(found)
    }

    async fn unfilled(&self) -> StoreResult<Vec<CompanyRecord>> {
        let table = self.read_table().await?;
        Ok(table
            .records(&self.rules)
            .into_iter()
            .filter(|record| !record.missing_fields().is_empty())
            .collect())
    }

    fn atomic_writes(&self) -> bool {
        false
    }
}

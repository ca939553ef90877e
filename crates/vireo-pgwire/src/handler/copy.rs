//! COPY FROM STDIN sub-protocol
//!
//! CopyInResponse, then one CopyData frame per input line in text format
//! (tab-separated, `\N` or empty = NULL, `\.` = end of stream), each line
//! synthesized into a backend insert. Row failures are counted and
//! reported in aggregate at CopyDone; they do not abort the stream.

use crate::connection::Connection;
use crate::executor::QueryExecutor;
use crate::protocol::backend::BackendMessage;
use crate::protocol::constants::FORMAT_TEXT;
use crate::protocol::frontend::FrontendMessage;
use sqlparser::ast::{CopyLegacyOption, CopyOption, CopySource, CopyTarget};
use tracing::{debug, warn};
use vireo_common::{Result, VireoError};

/// Run a `COPY tbl (cols?) FROM STDIN` statement to completion.
pub(crate) async fn run_copy_in(
    conn: &mut Connection,
    backend: &dyn QueryExecutor,
    source: &CopySource,
    to: bool,
    target: &CopyTarget,
    options: &[CopyOption],
    legacy_options: &[CopyLegacyOption],
) -> Result<()> {
    if to {
        return Err(VireoError::NotSupported("COPY TO".into()));
    }
    if !matches!(target, CopyTarget::Stdin) {
        return Err(VireoError::NotSupported(
            "COPY FROM a non-STDIN source".into(),
        ));
    }
    for option in options {
        if let CopyOption::Format(format) = option {
            if format.value.eq_ignore_ascii_case("binary") {
                return Err(VireoError::NotSupported("binary COPY".into()));
            }
        }
    }
    if legacy_options
        .iter()
        .any(|o| matches!(o, CopyLegacyOption::Binary))
    {
        return Err(VireoError::NotSupported("binary COPY".into()));
    }

    let (table, named_columns) = match source {
        CopySource::Table {
            table_name,
            columns,
        } => (
            table_name
                .0
                .last()
                .map(|ident| ident.value.clone())
                .unwrap_or_default(),
            columns.iter().map(|c| c.value.clone()).collect::<Vec<_>>(),
        ),
        CopySource::Query(_) => {
            return Err(VireoError::NotSupported("COPY (query)".into()));
        }
    };

    // Validate named columns against the schema; default to all of them.
    let schema = backend.table_schema(&table).await?;
    let columns: Vec<String> = if named_columns.is_empty() {
        schema.columns.iter().map(|c| c.name.clone()).collect()
    } else {
        for name in &named_columns {
            if schema.column_index(name).is_none() {
                return Err(VireoError::NotExist(format!(
                    "column \"{}\" of relation \"{}\"",
                    name, table
                )));
            }
        }
        named_columns
    };

    conn.send(BackendMessage::CopyInResponse {
        format: 0,
        column_formats: vec![FORMAT_TEXT; columns.len()],
    })
    .await?;
    conn.flush().await?;

    let mut inserted: u64 = 0;
    let mut failed: u64 = 0;

    loop {
        let (tag, body) = conn.read_message().await?;
        match FrontendMessage::decode(tag, &body)? {
            FrontendMessage::CopyData { data } => {
                let fields = match split_copy_line(&data) {
                    None => break, // \. end-of-stream marker
                    Some(fields) => fields,
                };
                if fields.len() != columns.len() {
                    let err = VireoError::ColumnsNotEqual {
                        expected: columns.len(),
                        actual: fields.len(),
                    };
                    warn!("COPY row rejected: {}", err);
                    conn.send(BackendMessage::notice(&err.to_string())).await?;
                    failed += 1;
                    continue;
                }
                let row: Vec<Option<String>> = fields.into_iter().map(null_field).collect();
                match backend.insert(&table, &columns, &[row]).await {
                    Ok(n) => inserted += n,
                    Err(e) => {
                        warn!("COPY row insert failed: {}", e);
                        conn.send(BackendMessage::notice(&e.to_string())).await?;
                        failed += 1;
                    }
                }
            }
            FrontendMessage::CopyDone => break,
            FrontendMessage::CopyFail { message } => {
                return Err(VireoError::InvalidMessage(format!(
                    "COPY from stdin failed: {}",
                    message
                )));
            }
            other => {
                // Flush/Sync may be interleaved by drivers; anything else
                // is dropped until the stream ends
                debug!(tag = %(other.tag() as char), "ignoring message during COPY");
            }
        }
    }

    if failed > 0 {
        warn!(inserted, failed, table = %table, "COPY completed with failures");
    }
    conn.send(BackendMessage::CommandComplete {
        tag: format!("COPY {}", inserted),
    })
    .await?;
    Ok(())
}

/// Split one text-format COPY line: strip the trailing `\r\n`, then split
/// on TAB. `None` means the `\.` end-of-stream marker.
pub(crate) fn split_copy_line(data: &[u8]) -> Option<Vec<String>> {
    let text = String::from_utf8_lossy(data);
    let trimmed = text.strip_suffix('\n').unwrap_or(&text);
    let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
    if trimmed == "\\." {
        return None;
    }
    Some(trimmed.split('\t').map(str::to_string).collect())
}

/// Empty and `\N` fields become NULL.
pub(crate) fn null_field(field: String) -> Option<String> {
    if field.is_empty() || field == "\\N" {
        None
    } else {
        Some(field)
    }
}

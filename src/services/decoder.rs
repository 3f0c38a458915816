//! 数据解码 - 业务能力层
//!
//! 把原始字节 / 文本规范化为表格、文本或二进制载荷，并按上限截断。
//! 电子表格取第一个非空工作表，PDF 抽取全部页面的文本；解析失败时退回二进制载荷。

use std::io::Cursor;

use base64::Engine;
use calamine::Reader;
use scraper::Html;
use serde_json::Value as JsonValue;

use tracing::debug;

use crate::config::PayloadLimits;
use crate::models::{DataReference, Payload, PayloadMeta, Table};

/// 按内容类型（或文件后缀）解码响应体
pub fn decode_body(
    source: DataReference,
    bytes: &[u8],
    content_type: Option<&str>,
    limits: &PayloadLimits,
) -> Result<Payload, String> {
    let content_type = content_type.map(|c| c.to_lowercase());
    let ct = content_type.as_deref().unwrap_or("");
    let path = source.locator.to_lowercase();
    let path = path.split(['?', '#']).next().unwrap_or_default().to_string();
    let is = |mime: &[&str], ext: &[&str]| {
        mime.iter().any(|m| ct.contains(m)) || ext.iter().any(|e| path.ends_with(e))
    };

    if is(&["spreadsheet", "ms-excel"], &[".xlsx", ".xls", ".xlsm", ".ods"]) {
        return Ok(match decode_spreadsheet(bytes) {
            Ok(table) => with_content_type(table_payload(source, table, limits), content_type),
            Err(reason) => {
                debug!("电子表格解析失败，按二进制处理: {}", reason);
                decode_binary(source, bytes, content_type, limits)
            }
        });
    }

    if is(&["application/pdf"], &[".pdf"]) {
        return Ok(match decode_pdf(bytes) {
            Ok(text) => with_content_type(text_payload(source, &text, limits), content_type),
            Err(reason) => {
                debug!("PDF 解析失败，按二进制处理: {}", reason);
                decode_binary(source, bytes, content_type, limits)
            }
        });
    }

    if is(
        &["image/", "audio/", "octet-stream"],
        &[".png", ".jpg", ".jpeg", ".gif", ".mp3", ".wav", ".opus", ".ogg"],
    ) {
        return Ok(decode_binary(source, bytes, content_type, limits));
    }

    // 下载被截断时末尾可能是半个多字节字符，丢掉即可
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        Err(_) => return Ok(decode_binary(source, bytes, content_type, limits)),
    };

    let mut payload = if is(&["text/csv"], &[".csv"]) {
        let table = decode_csv(text, ',')?;
        table_payload(source, table, limits)
    } else if is(&["tab-separated"], &[".tsv"]) {
        let table = decode_csv(text, '\t')?;
        table_payload(source, table, limits)
    } else if is(&["json"], &[".json"]) {
        let value: JsonValue = serde_json::from_str(text).map_err(|e| e.to_string())?;
        json_payload(source, &value, limits)
    } else if is(&["text/html"], &[".html", ".htm"]) {
        text_payload(source, &html_to_text(text), limits)
    } else {
        decode_inline(source, text, limits)
    };

    payload.meta.content_type = content_type;
    Ok(payload)
}

/// 解码内嵌文本：JSON → CSV → 纯文本
pub fn decode_inline(source: DataReference, text: &str, limits: &PayloadLimits) -> Payload {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
            return json_payload(source, &value, limits);
        }
    }
    if let Some(delimiter) = sniff_delimiter(trimmed) {
        if let Ok(table) = decode_csv(trimmed, delimiter) {
            return table_payload(source, table, limits);
        }
    }
    text_payload(source, trimmed, limits)
}

/// 读取电子表格的第一个非空工作表，首行作为列名
pub fn decode_spreadsheet(bytes: &[u8]) -> Result<Table, String> {
    let mut workbook =
        calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(|e| e.to_string())?;

    for name in workbook.sheet_names().to_vec() {
        let range = workbook.worksheet_range(&name).map_err(|e| e.to_string())?;
        let mut rows = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|cell| !cell.is_empty()));

        if let Some(columns) = rows.next() {
            return Ok(Table {
                columns,
                rows: rows.collect(),
            });
        }
    }

    Err("电子表格中没有数据".to_string())
}

/// 抽取 PDF 中所有页面的文本
pub fn decode_pdf(bytes: &[u8]) -> Result<String, String> {
    // 解析器遇到畸形文件可能 panic
    let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| "PDF 解析器异常退出".to_string())?;
    let text = extracted.map_err(|e| e.to_string())?;
    let text = text.trim();
    if text.is_empty() {
        return Err("PDF 中没有可抽取的文本".to_string());
    }
    Ok(text.to_string())
}

/// 解析 CSV（支持双引号包裹与转义）
pub fn decode_csv(text: &str, delimiter: char) -> Result<Table, String> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if record.iter().any(|f| !f.trim().is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err("CSV 中存在未闭合的引号".to_string());
    }
    record.push(field);
    if record.iter().any(|f| !f.trim().is_empty()) {
        records.push(record);
    }

    let mut records = records.into_iter();
    let columns: Vec<String> = records
        .next()
        .ok_or_else(|| "CSV 为空".to_string())?
        .into_iter()
        .map(|c| c.trim().to_string())
        .collect();
    let rows = records
        .map(|r| r.into_iter().map(|c| c.trim().to_string()).collect())
        .collect();

    Ok(Table { columns, rows })
}

/// JSON 对象数组 / 二维数组转换为表格
pub fn json_to_table(value: &JsonValue) -> Option<Table> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }

    if items.iter().all(JsonValue::is_object) {
        let mut columns: Vec<String> = Vec::new();
        for item in items {
            for key in item.as_object()?.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = items
            .iter()
            .map(|item| columns.iter().map(|c| cell_text(item.get(c))).collect())
            .collect();
        return Some(Table { columns, rows });
    }

    if items.iter().all(JsonValue::is_array) {
        let mut rows = items.iter().filter_map(|row| row.as_array());
        let columns = rows.next()?.iter().map(|c| cell_text(Some(c))).collect();
        let rows = rows
            .map(|row| row.iter().map(|c| cell_text(Some(c))).collect())
            .collect();
        return Some(Table { columns, rows });
    }

    None
}

/// 提取 HTML 中的可见文本
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ========== 截断策略 ==========

/// 表格只保留前 N 行，原始行数写入元数据
pub fn table_payload(source: DataReference, mut table: Table, limits: &PayloadLimits) -> Payload {
    let row_count = table.rows.len();
    let truncated = row_count > limits.max_table_rows;
    table.rows.truncate(limits.max_table_rows);
    Payload::table(
        source,
        table,
        PayloadMeta {
            row_count: Some(row_count),
            truncated,
            ..Default::default()
        },
    )
}

/// 文本按字符数截断
pub fn text_payload(source: DataReference, text: &str, limits: &PayloadLimits) -> Payload {
    let original_len = text.chars().count();
    let truncated = original_len > limits.max_text_chars;
    let text = if truncated {
        text.chars().take(limits.max_text_chars).collect()
    } else {
        text.to_string()
    };
    Payload::text(
        source,
        text,
        PayloadMeta {
            original_len: Some(original_len),
            truncated,
            ..Default::default()
        },
    )
}

fn with_content_type(mut payload: Payload, content_type: Option<String>) -> Payload {
    payload.meta.content_type = content_type;
    payload
}

fn json_payload(source: DataReference, value: &JsonValue, limits: &PayloadLimits) -> Payload {
    match json_to_table(value) {
        Some(table) => table_payload(source, table, limits),
        None => {
            let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            text_payload(source, &pretty, limits)
        }
    }
}

fn decode_binary(
    source: DataReference,
    bytes: &[u8],
    content_type: Option<String>,
    limits: &PayloadLimits,
) -> Payload {
    let truncated = bytes.len() > limits.max_binary_bytes;
    let kept = &bytes[..bytes.len().min(limits.max_binary_bytes)];
    Payload::binary(
        source,
        base64::engine::general_purpose::STANDARD.encode(kept),
        PayloadMeta {
            content_type,
            original_len: Some(bytes.len()),
            truncated,
            ..Default::default()
        },
    )
}

/// 粗略判断文本是否为分隔符表格：至少两行且前几行分隔符数量一致
fn sniff_delimiter(text: &str) -> Option<char> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).take(5).collect();
    if lines.len() < 2 {
        return None;
    }
    [',', '\t', ';'].into_iter().find(|&d| {
        let first = lines[0].matches(d).count();
        first > 0 && lines.iter().all(|l| l.matches(d).count() == first)
    })
}

fn cell_text(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

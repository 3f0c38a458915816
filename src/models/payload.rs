//! 数据载荷模型
//!
//! 由 DataAcquirer 从 DataReference 解析得到，只在单步内有效

use serde::{Deserialize, Serialize};

use super::question::DataReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Tabular,
    Text,
    Binary,
}

/// 表格数据（所有单元格保留为原始字符串）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = name.trim().to_lowercase();
        self.columns
            .iter()
            .position(|c| c.trim().to_lowercase() == name)
    }

    /// 取出某一列中所有可解析为数字的值
    pub fn numeric_column(&self, index: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|row| row.get(index))
            .filter_map(|cell| cell.trim().replace(',', "").parse::<f64>().ok())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadContent {
    Table(Table),
    Text { text: String },
    Binary { base64: String },
    /// 获取失败时的占位
    Empty,
}

/// 载荷元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadMeta {
    pub content_type: Option<String>,
    /// 截断前的行数（表格）
    pub row_count: Option<usize>,
    /// 截断前的长度（文本按字符，二进制按字节）
    pub original_len: Option<usize>,
    pub truncated: bool,
    /// 获取失败的原因
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub source: DataReference,
    pub content: PayloadContent,
    pub meta: PayloadMeta,
}

impl Payload {
    pub fn table(source: DataReference, table: Table, meta: PayloadMeta) -> Self {
        Self {
            source,
            content: PayloadContent::Table(table),
            meta,
        }
    }

    pub fn text(source: DataReference, text: String, meta: PayloadMeta) -> Self {
        Self {
            source,
            content: PayloadContent::Text { text },
            meta,
        }
    }

    pub fn binary(source: DataReference, base64: String, meta: PayloadMeta) -> Self {
        Self {
            source,
            content: PayloadContent::Binary { base64 },
            meta,
        }
    }

    /// 获取失败时的占位载荷，带上失败原因
    pub fn placeholder(source: DataReference, failure: impl std::fmt::Display) -> Self {
        Self {
            source,
            content: PayloadContent::Empty,
            meta: PayloadMeta {
                failure: Some(failure.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match &self.content {
            PayloadContent::Table(_) => PayloadKind::Tabular,
            PayloadContent::Binary { .. } => PayloadKind::Binary,
            PayloadContent::Text { .. } | PayloadContent::Empty => PayloadKind::Text,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.meta.failure.is_none() && self.content != PayloadContent::Empty
    }

    pub fn as_table(&self) -> Option<&Table> {
        match &self.content {
            PayloadContent::Table(t) => Some(t),
            _ => None,
        }
    }
}

//! 确定性计算 - 业务能力层
//!
//! 能直接算出来的题目不走语言模型：
//! - 整个题干就是一个算式（`What is 2+2?`）
//! - 唯一表格载荷上某一列的无条件聚合（sum / mean / count / max / min）
//!
//! 拿不准的一律返回 None，交给模型。

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::models::{Answer, AnswerShape, AnswerValue, Payload, Question, Table};

/// 出现这些词说明聚合带筛选或分组条件
const QUALIFIERS: &[&str] = &[
    "where",
    "which",
    "whose",
    "if",
    "when",
    "only",
    "for rows",
    "for each",
    "each",
    "per",
    "group by",
    "grouped",
    "by region",
    "greater than",
    "less than",
    "more than",
    "fewer than",
    "at least",
    "at most",
    "above",
    "below",
    "over",
    "under",
    "between",
    "excluding",
    "except",
    "without",
    "not",
    "distinct",
    "unique",
    "top",
    "first",
    "last",
    "page",
    "cutoff",
    "filter",
    "filtered",
];

/// 列聚合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Mean,
    Count,
    Max,
    Min,
}

impl Aggregate {
    const KEYWORDS: &'static [(Aggregate, &'static [&'static str])] = &[
        (Aggregate::Mean, &["average", "mean"]),
        (Aggregate::Sum, &["sum", "total"]),
        (Aggregate::Max, &["maximum", "max", "largest", "highest"]),
        (Aggregate::Min, &["minimum", "min", "smallest", "lowest"]),
        (Aggregate::Count, &["how many", "count", "number of"]),
    ];

    /// 从题干中识别唯一的聚合方式，出现多种时返回 None
    fn detect(prompt: &str) -> Option<Self> {
        let lower = prompt.to_lowercase();
        let mut found = Self::KEYWORDS
            .iter()
            .filter(|(_, words)| words.iter().any(|w| contains_word(&lower, w)))
            .map(|(agg, _)| *agg);
        let first = found.next()?;
        match found.next() {
            None => Some(first),
            Some(_) => None,
        }
    }

    /// 在表格的某一列上计算聚合值
    pub fn apply(self, table: &Table, column: usize) -> Option<f64> {
        let values = match self {
            Aggregate::Count => {
                let count = table
                    .rows
                    .iter()
                    .filter_map(|row| row.get(column))
                    .filter(|cell| !cell.trim().is_empty())
                    .count();
                return Some(count as f64);
            }
            _ => table.numeric_column(column),
        };
        if values.is_empty() {
            return None;
        }
        let result = match self {
            Aggregate::Sum | Aggregate::Count => values.iter().sum(),
            Aggregate::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregate::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Aggregate::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        };
        Some(result)
    }
}

/// 尝试确定性求解，无法分类时返回 None
pub fn solve(question: &Question, payloads: &[Payload]) -> Option<Answer> {
    if !matches!(question.shape, AnswerShape::Number | AnswerShape::Text) {
        return None;
    }

    if let Some(value) = solve_arithmetic(question) {
        debug!("算式题直接计算: {}", value);
        return Some(Answer::deterministic(AnswerValue::Number(value)));
    }

    if let Some(value) = solve_column_aggregate(&question.prompt, payloads) {
        debug!("列聚合直接计算: {}", value);
        return Some(Answer::deterministic(AnswerValue::Number(value)));
    }

    None
}

/// 整个题干恰好是一个二元算式，可带 "what is" / "compute" 之类的前缀
fn solve_arithmetic(question: &Question) -> Option<f64> {
    if !question.references.is_empty() {
        return None;
    }

    let caps = bare_expression_regex().captures(question.prompt.trim())?;
    let left: f64 = caps.get(1)?.as_str().parse().ok()?;
    let right: f64 = caps.get(3)?.as_str().parse().ok()?;
    match caps.get(2)?.as_str().trim() {
        "+" => Some(left + right),
        "-" => Some(left - right),
        "*" | "×" | "x" | "X" => Some(left * right),
        "/" | "÷" if right != 0.0 => Some(left / right),
        _ => None,
    }
}

/// `x` 作乘号时两侧必须有空白，避免把 `0x1F` 之类读成乘法
fn bare_expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:(?:what\s+is|what's|compute|calculate|evaluate)\s+)?(-?\d+(?:\.\d+)?)\s*([+\-*/×÷]|\s[xX]\s)\s*(-?\d+(?:\.\d+)?)\s*[?=]?$",
        )
        .unwrap()
    })
}

/// 列聚合：只有一个可用表格载荷，且题干里恰好提到一个列名
fn solve_column_aggregate(prompt: &str, payloads: &[Payload]) -> Option<f64> {
    let mut tables = payloads
        .iter()
        .filter(|p| p.is_usable())
        .filter_map(|p| p.as_table().map(|t| (t, p.meta.truncated)));
    let (table, truncated) = tables.next()?;
    if tables.next().is_some() || truncated {
        return None;
    }

    if has_qualifier(prompt) {
        return None;
    }
    let aggregate = Aggregate::detect(prompt)?;
    let column = mentioned_column(prompt, table)?;
    aggregate.apply(table, column)
}

fn mentioned_column(prompt: &str, table: &Table) -> Option<usize> {
    let lower = prompt.to_lowercase();
    let mut hits = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.trim().is_empty())
        .filter(|(_, name)| contains_word(&lower, &name.trim().to_lowercase()))
        .map(|(idx, _)| idx);
    let first = hits.next()?;
    match hits.next() {
        None => Some(first),
        Some(_) => None,
    }
}

fn has_qualifier(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    QUALIFIERS.iter().any(|q| contains_word(&lower, q))
}

fn contains_word(haystack: &str, word: &str) -> bool {
    Regex::new(&format!(r"\b{}\b", regex::escape(word)))
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

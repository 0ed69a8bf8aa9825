//! Query string parsing
//!
//! ```text
//! expr := term (";" op? term)*      op := "+" | "-"
//! term := NAME | "title#" TITLE | "wl#" USER "," TOKEN
//!       | "geobbox#" TITLE "," KM | "geobbox#" LAT "," LON "," KM
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// Separator between a term's type prefix and its parameters
const TYPE_SEPARATOR: char = '#';

/// Explicit operator in front of a term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
}

/// Set operation applied to the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Difference,
}

/// Center of a bounding box query
#[derive(Debug, Clone, PartialEq)]
pub enum GeoAnchor {
    Point { lat: f64, lon: f64 },
    /// Coordinate of a main-namespace page
    Page { title: String },
}

/// One resolvable term
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTerm {
    /// Category name in database form (underscores)
    Category { name: String, depth: u32 },
    Title { title: String },
    Watchlist { user: String, token: String },
    GeoBox { anchor: GeoAnchor, radius_km: f64 },
}

impl fmt::Display for QueryTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTerm::Category { name, depth } => write!(f, "category '{}' (depth {})", name, depth),
            QueryTerm::Title { title } => write!(f, "title '{}'", title),
            // token stays out of logs
            QueryTerm::Watchlist { .. } => write!(f, "watchlist ___,___"),
            QueryTerm::GeoBox { anchor, radius_km } => match anchor {
                GeoAnchor::Point { lat, lon } => write!(f, "geobbox {},{} ({} km)", lat, lon, radius_km),
                GeoAnchor::Page { title } => write!(f, "geobbox '{}' ({} km)", title, radius_km),
            },
        }
    }
}

/// A term with its optional operator
#[derive(Debug, Clone, PartialEq)]
pub struct QueryClause {
    pub operator: Option<Operator>,
    pub term: QueryTerm,
}

impl QueryClause {
    /// Operation for this clause at the given position. `None` means the
    /// clause is skipped (a leading "-").
    pub fn set_op(&self, first: bool) -> Option<SetOp> {
        match (self.operator, first) {
            (None, _) | (Some(Operator::Plus), true) => Some(SetOp::Union),
            (Some(Operator::Minus), true) => None,
            (Some(Operator::Plus), false) => Some(SetOp::Intersect),
            (Some(Operator::Minus), false) => Some(SetOp::Difference),
        }
    }
}

/// Parsed query, evaluated strictly left to right
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanQuery {
    pub clauses: Vec<QueryClause>,
}

impl BooleanQuery {
    /// Parse `input`; plain category terms get `depth`
    pub fn parse(input: &str, depth: u32) -> Result<Self> {
        let clauses = input
            .split(';')
            .map(|param| parse_clause(param.trim(), depth))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clauses })
    }
}

fn parse_clause(param: &str, depth: u32) -> Result<QueryClause> {
    if param.is_empty() {
        return Err(Error::validation("Empty category name specified."));
    }

    let (operator, rest) = match param.chars().next() {
        Some('+') => (Some(Operator::Plus), param[1..].trim()),
        Some('-') => (Some(Operator::Minus), param[1..].trim()),
        _ => (None, param),
    };

    Ok(QueryClause {
        operator,
        term: parse_term(rest, depth)?,
    })
}

fn parse_term(token: &str, depth: u32) -> Result<QueryTerm> {
    let Some((kind, params)) = token.split_once(TYPE_SEPARATOR) else {
        if token.is_empty() {
            return Err(Error::validation("Empty category name specified."));
        }
        return Ok(QueryTerm::Category {
            name: token.replace(' ', "_"),
            depth,
        });
    };

    match kind {
        "wl" => {
            let parts: Vec<&str> = params.split(',').collect();
            match parts.as_slice() {
                [user, token] => Ok(QueryTerm::Watchlist {
                    user: user.to_string(),
                    token: token.to_string(),
                }),
                _ => Err(Error::validation(format!(
                    "Watchlist syntax is: wl{}USERNAME,TOKEN",
                    TYPE_SEPARATOR
                ))),
            }
        }
        "title" => Ok(QueryTerm::Title {
            title: params.to_string(),
        }),
        "geobbox" => parse_geobbox(params),
        other => Err(Error::validation(format!("invalid query type: '{}'", other))),
    }
}

fn parse_geobbox(params: &str) -> Result<QueryTerm> {
    let parts: Vec<&str> = params.split(',').collect();
    match parts.as_slice() {
        [title, km] => Ok(QueryTerm::GeoBox {
            anchor: GeoAnchor::Page {
                title: title.to_string(),
            },
            radius_km: parse_number(km)?,
        }),
        [lat, lon, km] => Ok(QueryTerm::GeoBox {
            anchor: GeoAnchor::Point {
                lat: parse_number(lat)?,
                lon: parse_number(lon)?,
            },
            radius_km: parse_number(km)?,
        }),
        _ => Err(Error::validation(format!(
            "Use: 'geobbox{sep}PAGETITLE,BBOXSIZE_IN_KM' or 'geobbox{sep}LAT,LON,BBOXSIZE_IN_KM'",
            sep = TYPE_SEPARATOR
        ))),
    }
}

fn parse_number(text: &str) -> Result<f64> {
    let text = text.trim();
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| Error::validation(format!("Invalid number in geobbox query: '{}'", text)))
}

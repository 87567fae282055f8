use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::StatusView;

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryParamError {
    #[error("invalid value for '{field}': {value:?}")]
    Invalid { field: &'static str, value: String },
}

/// Parameters of one list request. Doubles as the cache key of the page it
/// produced, so it is ordered and hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub status: StatusView,
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            status: StatusView::Active,
            page: 1,
            limit: DEFAULT_LIMIT,
            search: None,
            filters: BTreeMap::new(),
            sort_by: None,
            sort_order: SortOrder::Desc,
        }
    }
}

impl ListParams {
    pub fn with_status(mut self, status: StatusView) -> Self {
        self.status = status;
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        let trimmed = search.trim();
        self.search = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Builds params from a flat query string map. Keys other than the
    /// reserved ones become column filters; empty values are ignored.
    pub fn from_query<I>(pairs: I) -> Result<Self, QueryParamError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut params = Self::default();

        for (key, value) in pairs {
            if value.trim().is_empty() {
                continue;
            }
            match key.as_str() {
                "status" => {
                    params.status = value.parse().map_err(|_| QueryParamError::Invalid {
                        field: "status",
                        value: value.clone(),
                    })?;
                }
                "page" => {
                    let page: u32 = value.parse().map_err(|_| QueryParamError::Invalid {
                        field: "page",
                        value: value.clone(),
                    })?;
                    params = params.with_page(page);
                }
                "limit" => {
                    let limit: u32 = value.parse().map_err(|_| QueryParamError::Invalid {
                        field: "limit",
                        value: value.clone(),
                    })?;
                    params = params.with_limit(limit);
                }
                "search" => params = params.with_search(value),
                "sortBy" => params.sort_by = Some(value),
                "sortOrder" => {
                    params.sort_order = match value.to_ascii_lowercase().as_str() {
                        "asc" => SortOrder::Asc,
                        "desc" => SortOrder::Desc,
                        _ => {
                            return Err(QueryParamError::Invalid {
                                field: "sortOrder",
                                value,
                            });
                        }
                    };
                }
                _ => {
                    params.filters.insert(key, value);
                }
            }
        }

        Ok(params)
    }

    /// Inverse of [`ListParams::from_query`], used by HTTP clients.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("status".to_string(), self.status.to_string()),
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if let Some(search) = &self.search {
            pairs.push(("search".to_string(), search.clone()));
        }
        if let Some(sort_by) = &self.sort_by {
            pairs.push(("sortBy".to_string(), sort_by.clone()));
        }
        pairs.push((
            "sortOrder".to_string(),
            match self.sort_order {
                SortOrder::Asc => "asc".to_string(),
                SortOrder::Desc => "desc".to_string(),
            },
        ));
        pairs.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unknown_keys_become_filters() {
        let params = ListParams::from_query(pairs(&[
            ("status", "deleted"),
            ("page", "3"),
            ("limit", "500"),
            ("search", "  hello "),
            ("approved", "true"),
            ("postId", ""),
        ]))
        .unwrap();

        assert_eq!(params.status, StatusView::Deleted);
        assert_eq!(params.page, 3);
        assert_eq!(params.limit, MAX_LIMIT);
        assert_eq!(params.search.as_deref(), Some("hello"));
        assert_eq!(params.filters.get("approved").map(String::as_str), Some("true"));
        assert!(!params.filters.contains_key("postId"));
    }

    #[test]
    fn rejects_bad_page() {
        let err = ListParams::from_query(pairs(&[("page", "abc")])).unwrap_err();
        assert_eq!(
            err,
            QueryParamError::Invalid {
                field: "page",
                value: "abc".into()
            }
        );
    }

    #[test]
    fn to_query_reparses_to_same_params() {
        let params = ListParams::default()
            .with_status(StatusView::Custom("NEW".into()))
            .with_page(2)
            .with_search("x")
            .with_filter("priority", "HIGH");
        let reparsed = ListParams::from_query(params.to_query()).unwrap();
        assert_eq!(reparsed, params);
    }
}

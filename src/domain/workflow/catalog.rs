//! Catalogues of query targets: tables for SQL generation and APIs for tool use

use serde::{Deserialize, Serialize};

/// A table the SQL pipelines may query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub description: String,
    /// Column holding the transaction or reference date, `YYYYMMDD`
    pub date_column: String,
}

impl TableSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        date_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            date_column: date_column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCatalog {
    tables: Vec<TableSpec>,
}

impl TableCatalog {
    pub fn new(tables: Vec<TableSpec>) -> Self {
        Self { tables }
    }

    pub fn get(&self, name: &str) -> Option<&TableSpec> {
        let name = name.trim();
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    /// `name: description` lines for prompts
    pub fn describe(&self) -> String {
        self.tables
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for TableCatalog {
    fn default() -> Self {
        Self::new(vec![
            TableSpec::new(
                "amt",
                "Account balances per account and reference date",
                "reg_dt",
            ),
            TableSpec::new(
                "trsc",
                "Deposit and withdrawal transactions per account",
                "trsc_dt",
            ),
        ])
    }
}

/// How an API's parameters are resolved before invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParamResolution {
    /// Parameters are used as extracted
    #[default]
    Direct,
    /// A reporting granularity must be resolved first
    Period,
}

/// An API the tool-use pipeline may invoke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub resolution: ParamResolution,
}

impl ApiSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            resolution: ParamResolution::Direct,
        }
    }

    pub fn period_aware(mut self) -> Self {
        self.resolution = ParamResolution::Period;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCatalog {
    apis: Vec<ApiSpec>,
}

impl ApiCatalog {
    pub fn new(apis: Vec<ApiSpec>) -> Self {
        Self { apis }
    }

    pub fn get(&self, name: &str) -> Option<&ApiSpec> {
        let name = name.trim();
        self.apis.iter().find(|a| a.name == name)
    }

    pub fn apis(&self) -> &[ApiSpec] {
        &self.apis
    }

    pub fn describe(&self) -> String {
        self.apis
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ApiCatalog {
    fn default() -> Self {
        Self::new(vec![
            ApiSpec::new(
                "aicfo_get_financial_flow",
                "Inflows and outflows aggregated by year, quarter, month or day",
            )
            .period_aware(),
            ApiSpec::new("aicfo_get_all_amt", "Current balances of all accounts"),
            ApiSpec::new("aicfo_get_all_trsc", "Transaction history of all accounts"),
            ApiSpec::new(
                "aicfo_get_financial_status",
                "Financial position summary for the period",
            ),
            ApiSpec::new("aicfo_get_available_fund", "Funds available for use"),
        ])
    }
}

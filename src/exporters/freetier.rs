//! Free Tier usage and Cost Explorer usage quantities.

use std::sync::Arc;

use aws_sdk_costexplorer::{
    Client as CostExplorerClient,
    types::{DateInterval, Dimension, DimensionValues, Expression, Granularity},
};
use aws_sdk_freetier::Client as FreeTierClient;
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ExporterError, ExporterState, common_routes, provider};

const FREE_TIER: &str = "Free Tier usage";
const COST_EXPLORER: &str = "Cost Explorer usage";
const USAGE_QUANTITY: &str = "UsageQuantity";

pub fn router(state: Arc<ExporterState>) -> Router {
    Router::new()
        .route("/freetier", get(free_tier))
        .route("/freetier/cost-explorer", get(cost_explorer))
        .merge(common_routes("freetier"))
        .with_state(state)
}

async fn free_tier(State(state): State<Arc<ExporterState>>) -> Result<Json<Value>, ExporterError> {
    state
        .cached("freetier", || async {
            let client = state.client::<FreeTierClient>(FREE_TIER).await?;
            let mut usages = Vec::new();
            let mut next_token: Option<String> = None;

            loop {
                let page = client
                    .get_free_tier_usage()
                    .set_next_token(next_token.take())
                    .send()
                    .await
                    .map_err(provider(FREE_TIER))?;

                usages.extend(page.free_tier_usages().iter().map(|usage| {
                    json!({
                        "Service": usage.service(),
                        "Operation": usage.operation(),
                        "UsageType": usage.usage_type(),
                        "Region": usage.region(),
                        "ActualUsageAmount": usage.actual_usage_amount(),
                        "ForecastedUsageAmount": usage.forecasted_usage_amount(),
                        "Limit": usage.limit(),
                        "Unit": usage.unit(),
                        "Description": usage.description(),
                        "FreeTierType": usage.free_tier_type(),
                    })
                }));

                match page.next_token() {
                    Some(token) => next_token = Some(token.to_string()),
                    None => break,
                }
            }

            info!("Retrieved {} Free Tier usage entries", usages.len());
            Ok(json!({ "freetier_usages": usages }))
        })
        .await
}

#[derive(Debug, Default, Deserialize)]
pub struct CostExplorerQuery {
    pub usage_types: Option<String>,
    pub time_periods: Option<String>,
}

/// Validated Cost Explorer request: usage types and a `[start, end)` date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageQuery {
    pub usage_types: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl UsageQuery {
    /// Parse the query string; the period defaults to the current month including today.
    pub fn parse(query: &CostExplorerQuery, today: NaiveDate) -> Result<Self, ExporterError> {
        let usage_types: Vec<String> = query
            .usage_types
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|usage_type| !usage_type.is_empty())
            .map(str::to_owned)
            .collect();

        if usage_types.is_empty() {
            return Err(ExporterError::BadRequest(
                "usage_types query parameter is required".to_string(),
            ));
        }

        let (start, end) = match query.time_periods.as_deref() {
            Some(periods) => {
                let Some((start, end)) = periods.split_once(',') else {
                    return Err(ExporterError::BadRequest(
                        "time_periods must be 'start,end' (YYYY-MM-DD)".to_string(),
                    ));
                };
                (parse_date(start)?, parse_date(end)?)
            }
            None => (
                today.with_day(1).unwrap_or(today),
                today.succ_opt().unwrap_or(today),
            ),
        };

        // Cost Explorer treats `end` as exclusive and rejects empty periods
        if start >= end {
            return Err(ExporterError::BadRequest(format!(
                "time period start {start} must be before end {end}"
            )));
        }

        Ok(Self {
            usage_types,
            start,
            end,
        })
    }

    fn cache_key(&self) -> String {
        format!(
            "cost_explorer:{}:{}:{}",
            self.usage_types.join(","),
            self.start,
            self.end
        )
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, ExporterError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ExporterError::BadRequest(format!("invalid date '{}'", value.trim())))
}

async fn cost_explorer(
    State(state): State<Arc<ExporterState>>,
    Query(query): Query<CostExplorerQuery>,
) -> Result<Json<Value>, ExporterError> {
    let usage = UsageQuery::parse(&query, Utc::now().date_naive())?;

    state
        .cached(&usage.cache_key(), || async {
            let client = state.client::<CostExplorerClient>(COST_EXPLORER).await?;
            usage_quantities(&client, &usage).await
        })
        .await
}

async fn usage_quantities(client: &CostExplorerClient, usage: &UsageQuery) -> Result<Value, ExporterError> {
    let period = DateInterval::builder()
        .start(usage.start.to_string())
        .end(usage.end.to_string())
        .build()
        .map_err(|e| ExporterError::BadRequest(e.to_string()))?;

    let filter = Expression::builder()
        .dimensions(
            DimensionValues::builder()
                .key(Dimension::UsageType)
                .set_values(Some(usage.usage_types.clone()))
                .build(),
        )
        .build();

    let mut days = Vec::new();
    let mut total = 0.0_f64;
    let mut next_token: Option<String> = None;

    loop {
        let page = client
            .get_cost_and_usage()
            .time_period(period.clone())
            .granularity(Granularity::Daily)
            .metrics(USAGE_QUANTITY)
            .filter(filter.clone())
            .set_next_page_token(next_token.take())
            .send()
            .await
            .map_err(provider(COST_EXPLORER))?;

        for result in page.results_by_time() {
            let metric = result.total().and_then(|total| total.get(USAGE_QUANTITY));
            let amount = metric.and_then(|m| m.amount());
            total += amount.and_then(|a| a.parse::<f64>().ok()).unwrap_or(0.0);

            days.push(json!({
                "Start": result.time_period().map(|p| p.start()),
                "End": result.time_period().map(|p| p.end()),
                "Amount": amount,
                "Unit": metric.and_then(|m| m.unit()),
                "Estimated": result.estimated(),
            }));
        }

        match page.next_page_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    info!(
        "Retrieved {} days of usage for {}",
        days.len(),
        usage.usage_types.join(",")
    );
    Ok(json!({
        "usage_types": usage.usage_types,
        "time_period": { "Start": usage.start.to_string(), "End": usage.end.to_string() },
        "results": days,
        "total_usage_quantity": total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aws::portal::testing::{FakeSsoPortal, credentials},
        exporters::testing,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn query(usage_types: Option<&str>, time_periods: Option<&str>) -> CostExplorerQuery {
        CostExplorerQuery {
            usage_types: usage_types.map(str::to_owned),
            time_periods: time_periods.map(str::to_owned),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_explicit_period() {
        let parsed = UsageQuery::parse(
            &query(
                Some("APN1-DataTransfer-Out-Bytes, APN1-BoxUsage:t2.micro"),
                Some("2024-07-01,2024-07-24"),
            ),
            date(2024, 8, 15),
        )
        .unwrap();

        assert_eq!(
            parsed.usage_types,
            ["APN1-DataTransfer-Out-Bytes", "APN1-BoxUsage:t2.micro"]
        );
        assert_eq!(parsed.start, date(2024, 7, 1));
        assert_eq!(parsed.end, date(2024, 7, 24));
    }

    #[test]
    fn test_parse_defaults_to_current_month() {
        let parsed = UsageQuery::parse(&query(Some("BoxUsage"), None), date(2024, 8, 15)).unwrap();

        assert_eq!(parsed.start, date(2024, 8, 1));
        assert_eq!(parsed.end, date(2024, 8, 16));
    }

    #[test]
    fn test_parse_default_on_first_of_month_is_not_empty() {
        let parsed = UsageQuery::parse(&query(Some("BoxUsage"), None), date(2024, 9, 1)).unwrap();

        assert_eq!(parsed.start, date(2024, 9, 1));
        assert_eq!(parsed.end, date(2024, 9, 2));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let today = date(2024, 8, 15);
        let cases = [
            query(None, None),
            query(Some(" , "), None),
            query(Some("BoxUsage"), Some("2024-07-01")),
            query(Some("BoxUsage"), Some("2024-07-01,July")),
            query(Some("BoxUsage"), Some("2024-07-24,2024-07-01")),
            query(Some("BoxUsage"), Some("2024-07-01,2024-07-01")),
        ];

        for case in cases {
            let err = UsageQuery::parse(&case, today).unwrap_err();
            assert!(matches!(err, ExporterError::BadRequest(_)), "{case:?}");
        }
    }

    #[test]
    fn test_cache_key_depends_on_query() {
        let today = date(2024, 8, 15);
        let a = UsageQuery::parse(&query(Some("A"), None), today).unwrap();
        let b = UsageQuery::parse(&query(Some("B"), None), today).unwrap();

        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[tokio::test]
    async fn test_cost_explorer_without_usage_types_is_400() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            dir.path(),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(Some("123456789012")),
        );

        let response = router(Arc::new(state))
            .oneshot(
                Request::get("/freetier/cost-explorer")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

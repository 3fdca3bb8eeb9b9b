//! Organization structure, policies and access report of the management account.

use std::{future::Future, sync::Arc, time::Duration};

use aws_sdk_iam::{
    Client as IamClient,
    operation::get_organizations_access_report::GetOrganizationsAccessReportOutput,
    types::JobStatusType,
};
use aws_sdk_organizations::{Client, types::PolicyType};
use axum::{Json, Router, extract::State, routing::get};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::info;

use super::{ExporterError, ExporterState, common_routes, provider, timestamp};

const STRUCTURE: &str = "organization structure";
const POLICIES: &str = "organization policies";
const ACCESS_REPORT: &str = "access report";

const REPORT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const REPORT_MAX_POLLS: usize = 100;

/// Policy types reported by `/organization/policies`
const REPORTED_POLICY_TYPES: [PolicyType; 2] =
    [PolicyType::ServiceControlPolicy, PolicyType::TagPolicy];

pub fn router(state: Arc<ExporterState>) -> Router {
    Router::new()
        .route("/organization", get(organization))
        .route("/organization/policies", get(policies))
        .route("/organization/access-report", get(access_report))
        .merge(common_routes("organizations"))
        .with_state(state)
}

async fn organization(
    State(state): State<Arc<ExporterState>>,
) -> Result<Json<Value>, ExporterError> {
    state
        .cached("organization", || async {
            let client = state.client::<Client>(STRUCTURE).await?;
            organization_structure(&client).await
        })
        .await
}

async fn policies(State(state): State<Arc<ExporterState>>) -> Result<Json<Value>, ExporterError> {
    state
        .cached("organization_policies", || async {
            let client = state.client::<Client>(POLICIES).await?;
            let mut policies = Vec::new();
            for policy_type in REPORTED_POLICY_TYPES {
                policies.extend(policies_of_type(&client, policy_type).await?);
            }
            Ok(json!({ "policies": policies }))
        })
        .await
}

async fn access_report(
    State(state): State<Arc<ExporterState>>,
) -> Result<Json<Value>, ExporterError> {
    state
        .cached("access_report", || async {
            let organizations = state.client::<Client>(ACCESS_REPORT).await?;
            let iam = state.client::<IamClient>(ACCESS_REPORT).await?;
            let entity_path = root_entity_path(&organizations).await?;
            generate_access_report(&iam, &entity_path).await
        })
        .await
}

/// `{organization_id}/{root_id}` of the first root.
async fn root_entity_path(client: &Client) -> Result<String, ExporterError> {
    let unavailable = |reason: &str| ExporterError::Unavailable {
        what: ACCESS_REPORT,
        reason: reason.to_string(),
    };

    let described = client
        .describe_organization()
        .send()
        .await
        .map_err(provider(ACCESS_REPORT))?;
    let org_id = described
        .organization()
        .and_then(|org| org.id())
        .ok_or_else(|| unavailable("the organization has no ID"))?;

    let roots = client
        .list_roots()
        .send()
        .await
        .map_err(provider(ACCESS_REPORT))?;
    let root_id = roots
        .roots()
        .first()
        .and_then(|root| root.id())
        .ok_or_else(|| unavailable("the organization has no root"))?;

    Ok(format!("{org_id}/{root_id}"))
}

async fn generate_access_report(iam: &IamClient, entity_path: &str) -> Result<Value, ExporterError> {
    let job = iam
        .generate_organizations_access_report()
        .entity_path(entity_path)
        .send()
        .await
        .map_err(provider(ACCESS_REPORT))?;
    let job_id = job.job_id().ok_or_else(|| ExporterError::Unavailable {
        what: ACCESS_REPORT,
        reason: format!("no job ID returned for {entity_path}"),
    })?;
    info!("Access report job started: {job_id}");

    let report = poll_report(job_id, REPORT_POLL_INTERVAL, move || async move {
        let report = iam
            .get_organizations_access_report()
            .job_id(job_id)
            .send()
            .await
            .map_err(provider(ACCESS_REPORT))?;
        Ok((ReportProgress::from(report.job_status()), report))
    })
    .await?;

    let mut details = access_details(&report);
    let mut marker = next_marker(&report);
    while let Some(next) = marker.take() {
        let page = iam
            .get_organizations_access_report()
            .job_id(job_id)
            .marker(next)
            .send()
            .await
            .map_err(provider(ACCESS_REPORT))?;
        details.extend(access_details(&page));
        marker = next_marker(&page);
    }

    Ok(json!({
        "JobId": job_id,
        "EntityPath": entity_path,
        "JobStatus": report.job_status().as_str(),
        "JobCompletionDate": timestamp(report.job_completion_date()),
        "NumberOfServicesAccessible": report.number_of_services_accessible(),
        "NumberOfServicesNotAccessed": report.number_of_services_not_accessed(),
        "AccessDetails": details,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportProgress {
    Pending,
    Completed,
    Failed,
}

impl From<&JobStatusType> for ReportProgress {
    fn from(status: &JobStatusType) -> Self {
        match status {
            JobStatusType::Completed => Self::Completed,
            JobStatusType::Failed => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Call `check` every `interval` until the job completes, fails or runs out of polls.
async fn poll_report<T, F, Fut>(job_id: &str, interval: Duration, mut check: F) -> Result<T, ExporterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(ReportProgress, T), ExporterError>>,
{
    for _ in 0..REPORT_MAX_POLLS {
        sleep(interval).await;

        match check().await? {
            (ReportProgress::Pending, _) => continue,
            (ReportProgress::Completed, report) => {
                info!("Access report job completed: {job_id}");
                return Ok(report);
            }
            (ReportProgress::Failed, _) => {
                return Err(ExporterError::Unavailable {
                    what: ACCESS_REPORT,
                    reason: format!("access report job {job_id} failed"),
                });
            }
        }
    }

    Err(ExporterError::Unavailable {
        what: ACCESS_REPORT,
        reason: format!("access report job {job_id} did not complete after {REPORT_MAX_POLLS} polls"),
    })
}

fn access_details(report: &GetOrganizationsAccessReportOutput) -> Vec<Value> {
    report
        .access_details()
        .iter()
        .map(|detail| {
            json!({
                "ServiceName": detail.service_name(),
                "ServiceNamespace": detail.service_namespace(),
                "Region": detail.region(),
                "EntityPath": detail.entity_path(),
                "LastAuthenticatedTime": timestamp(detail.last_authenticated_time()),
                "TotalAuthenticatedEntities": detail.total_authenticated_entities(),
            })
        })
        .collect()
}

fn next_marker(report: &GetOrganizationsAccessReportOutput) -> Option<String> {
    if report.is_truncated() {
        report.marker().map(str::to_owned)
    } else {
        None
    }
}

/// Walk every root down through its organizational units.
async fn organization_structure(client: &Client) -> Result<Value, ExporterError> {
    let roots = client
        .list_roots()
        .send()
        .await
        .map_err(provider(STRUCTURE))?;

    let mut structure = Vec::new();
    for root in roots.roots() {
        let Some(root_id) = root.id() else { continue };

        structure.push(json!({
            "Id": root_id,
            "Arn": root.arn(),
            "Name": root.name(),
            "OrganizationalUnits": organizational_units(client, root_id).await?,
            "Accounts": accounts_for_parent(client, root_id).await?,
        }));
    }

    info!("Retrieved organization structure with {} roots", structure.len());
    Ok(json!({ "organizations": structure }))
}

fn organizational_units<'a>(
    client: &'a Client,
    parent_id: &'a str,
) -> BoxFuture<'a, Result<Vec<Value>, ExporterError>> {
    async move {
        let mut units = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = client
                .list_organizational_units_for_parent()
                .parent_id(parent_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(provider(STRUCTURE))?;

            for unit in page.organizational_units() {
                let Some(unit_id) = unit.id() else { continue };

                units.push(json!({
                    "Id": unit_id,
                    "Arn": unit.arn(),
                    "Name": unit.name(),
                    "OrganizationalUnits": organizational_units(client, unit_id).await?,
                    "Accounts": accounts_for_parent(client, unit_id).await?,
                }));
            }

            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(units)
    }
    .boxed()
}

async fn accounts_for_parent(client: &Client, parent_id: &str) -> Result<Vec<Value>, ExporterError> {
    let mut accounts = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = client
            .list_accounts_for_parent()
            .parent_id(parent_id)
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(provider(STRUCTURE))?;

        accounts.extend(page.accounts().iter().map(|account| {
            json!({
                "Id": account.id(),
                "Arn": account.arn(),
                "Email": account.email(),
                "Name": account.name(),
                "JoinedTimestamp": timestamp(account.joined_timestamp()),
            })
        }));

        match page.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    Ok(accounts)
}

/// Describe every policy of one type together with its attachment targets.
async fn policies_of_type(client: &Client, policy_type: PolicyType) -> Result<Vec<Value>, ExporterError> {
    let mut policies = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = client
            .list_policies()
            .filter(policy_type.clone())
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(provider(POLICIES))?;

        for summary in page.policies() {
            let Some(policy_id) = summary.id() else { continue };

            let described = client
                .describe_policy()
                .policy_id(policy_id)
                .send()
                .await
                .map_err(provider(POLICIES))?;
            let targets = policy_targets(client, policy_id).await?;

            policies.push(json!({
                "Id": policy_id,
                "Arn": summary.arn(),
                "Name": summary.name(),
                "Description": summary.description(),
                "Type": policy_type.as_str(),
                "AwsManaged": summary.aws_managed(),
                "Content": described.policy().and_then(|p| p.content()),
                "Targets": targets,
            }));
        }

        match page.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    info!("Retrieved {} policies of type {}", policies.len(), policy_type.as_str());
    Ok(policies)
}

async fn policy_targets(client: &Client, policy_id: &str) -> Result<Vec<Value>, ExporterError> {
    let mut targets = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = client
            .list_targets_for_policy()
            .policy_id(policy_id)
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(provider(POLICIES))?;

        targets.extend(page.targets().iter().map(|target| {
            json!({
                "TargetId": target.target_id(),
                "Arn": target.arn(),
                "Name": target.name(),
                "Type": target.r#type().map(|t| t.as_str()),
            })
        }));

        match page.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    Ok(targets)
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

    #[test]
    fn test_reported_policy_types() {
        let names: Vec<&str> = REPORTED_POLICY_TYPES.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, ["SERVICE_CONTROL_POLICY", "TAG_POLICY"]);
    }

    #[test]
    fn test_report_progress_from_job_status() {
        assert_eq!(ReportProgress::from(&JobStatusType::Completed), ReportProgress::Completed);
        assert_eq!(ReportProgress::from(&JobStatusType::Failed), ReportProgress::Failed);
        assert_eq!(ReportProgress::from(&JobStatusType::InProgress), ReportProgress::Pending);
    }

    #[tokio::test]
    async fn test_poll_report_waits_for_completion() {
        let mut polls = 0;
        let report = poll_report("job-1", Duration::ZERO, || {
            polls += 1;
            let progress = if polls < 3 {
                ReportProgress::Pending
            } else {
                ReportProgress::Completed
            };
            async move { Ok((progress, json!({"JobId": "job-1"}))) }
        })
        .await
        .unwrap();

        assert_eq!(polls, 3);
        assert_eq!(report["JobId"], "job-1");
    }

    #[tokio::test]
    async fn test_poll_report_failed_job_is_error() {
        let result = poll_report("job-2", Duration::ZERO, || async {
            Ok((ReportProgress::Failed, ()))
        })
        .await;

        assert!(matches!(result, Err(ExporterError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_poll_report_gives_up() {
        let mut polls = 0;
        let result = poll_report("job-3", Duration::ZERO, || {
            polls += 1;
            async { Ok((ReportProgress::Pending, ())) }
        })
        .await;

        assert!(matches!(result, Err(ExporterError::Unavailable { .. })));
        assert_eq!(polls, REPORT_MAX_POLLS);
    }

    #[tokio::test]
    async fn test_access_report_without_sso_session_is_500() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            &dir.path().join("missing"),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(Some("123456789012")),
        );

        let response = router(Arc::new(state))
            .oneshot(
                Request::get("/organization/access-report")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_organization_without_sso_session_is_500() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            &dir.path().join("missing"),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(Some("123456789012")),
        );

        let response = router(Arc::new(state))
            .oneshot(Request::get("/organization").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_policies_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            &dir.path().join("missing"),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(Some("123456789012")),
        );
        state
            .cache()
            .insert("organization_policies", json!({"policies": []}));

        let response = router(Arc::new(state))
            .oneshot(
                Request::get("/organization/policies")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}

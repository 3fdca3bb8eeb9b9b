//! Identity Center instances, their users and the permission sets of the first instance.

use std::{collections::HashMap, sync::Arc};

use aws_sdk_identitystore::{Client as IdentityStoreClient, types::MemberId};
use aws_sdk_ssoadmin::{Client, types::PrincipalType};
use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};
use tracing::info;

use super::{ExporterError, ExporterState, common_routes, provider, timestamp};
use crate::{aws::portal::api_error, error::ApiError};

const STRUCTURE: &str = "identity center structure";
const PERMISSION_SETS: &str = "permission sets";
const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";

pub fn router(state: Arc<ExporterState>) -> Router {
    Router::new()
        .route("/identity-center", get(identity_center))
        .route("/identity-center/permsets", get(permission_sets))
        .route("/identity-center/permission-sets", get(permission_sets))
        .merge(common_routes("identity-center"))
        .with_state(state)
}

async fn identity_center(
    State(state): State<Arc<ExporterState>>,
) -> Result<Json<Value>, ExporterError> {
    state
        .cached("identity_center", || async {
            let sso_admin = state.client::<Client>(STRUCTURE).await?;
            let identity_store = state.client::<IdentityStoreClient>(STRUCTURE).await?;
            let instances = list_instances(&sso_admin, STRUCTURE).await?;
            let mut described = HashMap::new();

            let mut structure = Vec::with_capacity(instances.len());
            for instance in &instances {
                let users = match instance.identity_store_id.as_deref() {
                    Some(store_id) => {
                        let directory = Directory {
                            identity_store: &identity_store,
                            sso_admin: &sso_admin,
                            store_id,
                            instance_arn: &instance.arn,
                        };
                        directory.users(&mut described).await?
                    }
                    None => Vec::new(),
                };
                info!("Retrieved {} users of instance {}", users.len(), instance.arn);

                structure.push(json!({
                    "InstanceArn": instance.arn,
                    "IdentityStoreId": instance.identity_store_id,
                    "Name": instance.name,
                    "Status": instance.status,
                    "Users": users,
                }));
            }

            Ok(json!({ "identity_center": structure }))
        })
        .await
}

async fn permission_sets(
    State(state): State<Arc<ExporterState>>,
) -> Result<Json<Value>, ExporterError> {
    state
        .cached("permission_sets", || async {
            let client = state.client::<Client>(PERMISSION_SETS).await?;
            let instance = list_instances(&client, PERMISSION_SETS)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ExporterError::Unavailable {
                    what: PERMISSION_SETS,
                    reason: "no Identity Center instance found".to_string(),
                })?;

            let mut sets = Vec::new();
            for arn in permission_set_arns(&client, &instance.arn).await? {
                sets.push(describe_permission_set(&client, &instance.arn, &arn).await?);
            }

            info!("Retrieved {} permission sets", sets.len());
            Ok(json!({ "instance_arn": instance.arn, "permission_sets": sets }))
        })
        .await
}

#[derive(Debug)]
struct Instance {
    arn: String,
    identity_store_id: Option<String>,
    name: Option<String>,
    status: Option<String>,
}

async fn list_instances(client: &Client, what: &'static str) -> Result<Vec<Instance>, ExporterError> {
    let mut instances = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = client
            .list_instances()
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(provider(what))?;

        instances.extend(page.instances().iter().filter_map(|instance| {
            Some(Instance {
                arn: instance.instance_arn()?.to_string(),
                identity_store_id: instance.identity_store_id().map(str::to_owned),
                name: instance.name().map(str::to_owned),
                status: instance.status().map(|s| s.as_str().to_owned()),
            })
        }));

        match page.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    Ok(instances)
}

/// The identity store of one instance and the sso-admin client for its assignments.
struct Directory<'a> {
    identity_store: &'a IdentityStoreClient,
    sso_admin: &'a Client,
    store_id: &'a str,
    instance_arn: &'a str,
}

impl Directory<'_> {
    /// Every user with the groups they joined and their account assignments.
    ///
    /// `described` memoizes permission set descriptions across users.
    async fn users(&self, described: &mut HashMap<String, Value>) -> Result<Vec<Value>, ExporterError> {
        let mut users = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .identity_store
                .list_users()
                .identity_store_id(self.store_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(provider(STRUCTURE))?;

            for user in page.users() {
                let user_id = user.user_id();
                let groups = self.joined_groups(user_id).await?;
                let assignments = self.account_assignments(user_id, described).await?;
                let emails: Vec<&str> = user.emails().iter().filter_map(|e| e.value()).collect();

                users.push(json!({
                    "UserId": user_id,
                    "UserName": user.user_name(),
                    "DisplayName": user.display_name(),
                    "Emails": emails,
                    "JoinedGroup": groups,
                    "AccountAssignments": assignments,
                }));
            }

            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(users)
    }

    async fn joined_groups(&self, user_id: &str) -> Result<Vec<Value>, ExporterError> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .identity_store
                .list_group_memberships_for_member()
                .identity_store_id(self.store_id)
                .member_id(MemberId::UserId(user_id.to_string()))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(provider(STRUCTURE))?;

            for membership in page.group_memberships() {
                let Some(group_id) = membership.group_id() else { continue };

                let group = self
                    .identity_store
                    .describe_group()
                    .identity_store_id(self.store_id)
                    .group_id(group_id)
                    .send()
                    .await
                    .map_err(provider(STRUCTURE))?;

                groups.push(json!({
                    "GroupId": group_id,
                    "DisplayName": group.display_name(),
                    "Description": group.description(),
                }));
            }

            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(groups)
    }

    async fn account_assignments(
        &self,
        user_id: &str,
        described: &mut HashMap<String, Value>,
    ) -> Result<Vec<Value>, ExporterError> {
        let mut assignments = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .sso_admin
                .list_account_assignments_for_principal()
                .instance_arn(self.instance_arn)
                .principal_id(user_id)
                .principal_type(PrincipalType::User)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(provider(STRUCTURE))?;

            for assignment in page.account_assignments() {
                let permission_set = match assignment.permission_set_arn() {
                    Some(arn) if described.contains_key(arn) => described.get(arn).cloned(),
                    Some(arn) => {
                        let summary =
                            permission_set_summary(self.sso_admin, self.instance_arn, arn, STRUCTURE).await?;
                        described.insert(arn.to_string(), summary.clone());
                        Some(summary)
                    }
                    None => None,
                };

                assignments.push(json!({
                    "AccountId": assignment.account_id(),
                    "PermissionSetArn": assignment.permission_set_arn(),
                    "PrincipalType": assignment.principal_type().map(|t| t.as_str()),
                    "PermissionSet": permission_set,
                }));
            }

            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(assignments)
    }
}

async fn permission_set_arns(client: &Client, instance_arn: &str) -> Result<Vec<String>, ExporterError> {
    let mut arns = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = client
            .list_permission_sets()
            .instance_arn(instance_arn)
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(provider(PERMISSION_SETS))?;

        arns.extend(page.permission_sets().iter().cloned());

        match page.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    Ok(arns)
}

/// `DescribePermissionSet` flattened to JSON.
async fn permission_set_summary(
    client: &Client,
    instance_arn: &str,
    permission_set_arn: &str,
    what: &'static str,
) -> Result<Value, ExporterError> {
    let described = client
        .describe_permission_set()
        .instance_arn(instance_arn)
        .permission_set_arn(permission_set_arn)
        .send()
        .await
        .map_err(provider(what))?;
    let details = described.permission_set();

    Ok(json!({
        "PermissionSetArn": permission_set_arn,
        "Name": details.and_then(|d| d.name()),
        "Description": details.and_then(|d| d.description()),
        "SessionDuration": details.and_then(|d| d.session_duration()),
        "RelayState": details.and_then(|d| d.relay_state()),
        "CreatedDate": timestamp(details.and_then(|d| d.created_date())),
    }))
}

async fn describe_permission_set(
    client: &Client,
    instance_arn: &str,
    permission_set_arn: &str,
) -> Result<Value, ExporterError> {
    let mut permission_set =
        permission_set_summary(client, instance_arn, permission_set_arn, PERMISSION_SETS).await?;

    let managed = client
        .list_managed_policies_in_permission_set()
        .instance_arn(instance_arn)
        .permission_set_arn(permission_set_arn)
        .send()
        .await
        .map_err(provider(PERMISSION_SETS))?;
    let managed: Vec<Value> = managed
        .attached_managed_policies()
        .iter()
        .map(|policy| json!({ "Name": policy.name(), "Arn": policy.arn() }))
        .collect();

    let customer_managed = client
        .list_customer_managed_policy_references_in_permission_set()
        .instance_arn(instance_arn)
        .permission_set_arn(permission_set_arn)
        .send()
        .await
        .map_err(provider(PERMISSION_SETS))?;
    let customer_managed: Vec<Value> = customer_managed
        .customer_managed_policy_references()
        .iter()
        .map(|reference| json!({ "Name": reference.name(), "Path": reference.path() }))
        .collect();

    let inline_policy = absent_if_not_found(
        client
            .get_inline_policy_for_permission_set()
            .instance_arn(instance_arn)
            .permission_set_arn(permission_set_arn)
            .send()
            .await
            .map_err(api_error),
    )?
    .and_then(|output| output.inline_policy().map(str::to_owned))
    .filter(|policy| !policy.is_empty());

    let boundary = absent_if_not_found(
        client
            .get_permissions_boundary_for_permission_set()
            .instance_arn(instance_arn)
            .permission_set_arn(permission_set_arn)
            .send()
            .await
            .map_err(api_error),
    )?
    .and_then(|output| {
        output.permissions_boundary().map(|boundary| {
            json!({
                "ManagedPolicyArn": boundary.managed_policy_arn(),
                "CustomerManagedPolicyReference": boundary
                    .customer_managed_policy_reference()
                    .map(|reference| json!({ "Name": reference.name(), "Path": reference.path() })),
            })
        })
    });

    if let Value::Object(fields) = &mut permission_set {
        fields.insert("ManagedPolicies".to_string(), json!(managed));
        fields.insert("CustomerManagedPolicies".to_string(), json!(customer_managed));
        fields.insert("InlinePolicy".to_string(), json!(inline_policy));
        fields.insert("PermissionsBoundary".to_string(), boundary.unwrap_or(Value::Null));
    }

    Ok(permission_set)
}

/// A permission set without an inline policy or boundary is not an error.
fn absent_if_not_found<T>(result: Result<T, ApiError>) -> Result<Option<T>, ExporterError> {
    match result {
        Ok(output) => Ok(Some(output)),
        Err(source) if source.code.as_deref() == Some(RESOURCE_NOT_FOUND) => Ok(None),
        Err(source) => Err(ExporterError::Provider {
            what: PERMISSION_SETS,
            source,
        }),
    }
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

    fn state_without_session() -> (TempDir, ExporterState) {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            &dir.path().join("missing"),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(Some("123456789012")),
        );
        (dir, state)
    }

    async fn status(state: ExporterState, uri: &str) -> StatusCode {
        router(Arc::new(state))
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_permission_sets_without_sso_session_is_500() {
        for uri in ["/identity-center/permsets", "/identity-center/permission-sets"] {
            let (_dir, state) = state_without_session();
            assert_eq!(status(state, uri).await, StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_identity_center_without_sso_session_is_500() {
        let (_dir, state) = state_without_session();
        assert_eq!(
            status(state, "/identity-center").await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_permsets_served_from_cache() {
        let (_dir, state) = state_without_session();
        state
            .cache()
            .insert("permission_sets", json!({"permission_sets": []}));

        assert_eq!(status(state, "/identity-center/permsets").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_identity_center_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            dir.path(),
            FakeSsoPortal::failing("UnauthorizedException"),
            &testing::settings(Some("123456789012")),
        );
        state
            .cache()
            .insert("identity_center", json!({"identity_center": []}));

        assert_eq!(status(state, "/identity-center").await, StatusCode::OK);
    }

    #[test]
    fn test_missing_attachment_is_absent() {
        let missing: Result<(), ApiError> =
            Err(ApiError::new(Some(RESOURCE_NOT_FOUND), "no permissions boundary"));
        assert!(absent_if_not_found(missing).unwrap().is_none());

        assert_eq!(absent_if_not_found(Ok("policy")).unwrap(), Some("policy"));

        let denied: Result<(), ApiError> = Err(ApiError::new(Some("AccessDeniedException"), "denied"));
        assert!(matches!(
            absent_if_not_found(denied),
            Err(ExporterError::Provider { .. })
        ));
    }
}

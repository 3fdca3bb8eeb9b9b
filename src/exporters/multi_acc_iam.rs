//! IAM authorization details across every account reachable with the permission set.

use std::{fmt, str::FromStr, sync::Arc};

use aws_sdk_iam::{
    Client,
    types::{AttachedPolicy, EntityType},
};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use clap::ValueEnum;
use serde_json::{Value, json};
use tracing::{error, info};

use super::{ExporterError, ExporterState, common_routes, provider, timestamp};
use crate::aws::{AccountEnumerator, AccountId};

const DETAILS: &str = "account authorization details";

/// Where the list of target accounts comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AccountSource {
    /// Accounts assigned to the cached SSO session
    #[default]
    Sso,
    /// Every account in the organization (ambient credentials)
    Org,
}

/// Entity filter accepted by `/multi-account-auth/{filter_type}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    User,
    Role,
    Group,
    LocalManagedPolicy,
    AwsManagedPolicy,
}

impl FilterType {
    pub const ALL: [FilterType; 5] = [
        Self::User,
        Self::Role,
        Self::Group,
        Self::LocalManagedPolicy,
        Self::AwsManagedPolicy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Role => "Role",
            Self::Group => "Group",
            Self::LocalManagedPolicy => "LocalManagedPolicy",
            Self::AwsManagedPolicy => "AWSManagedPolicy",
        }
    }

    fn entity_type(&self) -> EntityType {
        match self {
            Self::User => EntityType::User,
            Self::Role => EntityType::Role,
            Self::Group => EntityType::Group,
            Self::LocalManagedPolicy => EntityType::LocalManagedPolicy,
            Self::AwsManagedPolicy => EntityType::AwsManagedPolicy,
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterType {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|filter| filter.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(FilterType::as_str).collect();
                ExporterError::BadRequest(format!(
                    "Invalid filter type '{s}'. Valid types are: {}",
                    valid.join(", ")
                ))
            })
    }
}

pub struct MultiAccountState {
    exporter: ExporterState,
    enumerator: AccountEnumerator,
    source: AccountSource,
}

impl MultiAccountState {
    pub fn new(exporter: ExporterState, enumerator: AccountEnumerator, source: AccountSource) -> Self {
        Self {
            exporter,
            enumerator,
            source,
        }
    }

    async fn accounts(&self) -> Result<Vec<AccountId>, ExporterError> {
        info!("Retrieving account IDs ({:?})", self.source);
        match self.source {
            AccountSource::Sso => Ok(self
                .enumerator
                .list_accounts_via_sso(self.exporter.sso_region())
                .await),
            AccountSource::Org => Ok(self.enumerator.list_accounts_via_org().await?),
        }
    }
}

pub fn router(state: Arc<MultiAccountState>) -> Router {
    Router::new()
        .route("/multi-account-auth/:filter_type", get(multi_account_auth))
        .merge(common_routes("multi-acc-iam"))
        .with_state(state)
}

async fn multi_account_auth(
    State(state): State<Arc<MultiAccountState>>,
    Path(filter_type): Path<String>,
) -> Result<Json<Value>, ExporterError> {
    let filter: FilterType = filter_type.parse()?;

    state
        .exporter
        .cached(filter.as_str(), || async {
            let accounts = state.accounts().await?;
            let mut collected = Vec::new();

            for account in &accounts {
                info!("The target account is ... {account}");

                // Session failures are logged by the session layer
                let Ok(client) = state.exporter.client_in::<Client>(account.as_str(), DETAILS).await
                else {
                    continue;
                };

                match authorization_details(&client, account, filter).await {
                    Ok(details) => collected.push(details),
                    Err(e) => {
                        error!("Failed to retrieve details for account {account}: {}", e.detailed());
                    }
                }
            }

            if collected.is_empty() {
                return Err(ExporterError::Unavailable {
                    what: DETAILS,
                    reason: format!("no account out of {} returned {filter} details", accounts.len()),
                });
            }

            info!("Retrieved {filter} details from {} accounts", collected.len());
            Ok(Value::Array(collected))
        })
        .await
}

/// Every page of `GetAccountAuthorizationDetails` for one account, merged and tagged.
async fn authorization_details(
    client: &Client,
    account: &AccountId,
    filter: FilterType,
) -> Result<Value, ExporterError> {
    let account_id = account.as_str();
    let mut users = Vec::new();
    let mut groups = Vec::new();
    let mut roles = Vec::new();
    let mut policies = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let page = client
            .get_account_authorization_details()
            .filter(filter.entity_type())
            .set_marker(marker.take())
            .send()
            .await
            .map_err(provider(DETAILS))?;

        users.extend(page.user_detail_list().iter().map(|user| {
            json!({
                "Path": user.path(),
                "UserName": user.user_name(),
                "UserId": user.user_id(),
                "Arn": user.arn(),
                "CreateDate": timestamp(user.create_date()),
                "GroupList": user.group_list(),
                "AttachedManagedPolicies": attached(user.attached_managed_policies()),
                "AccountID": account_id,
            })
        }));

        groups.extend(page.group_detail_list().iter().map(|group| {
            json!({
                "Path": group.path(),
                "GroupName": group.group_name(),
                "GroupId": group.group_id(),
                "Arn": group.arn(),
                "CreateDate": timestamp(group.create_date()),
                "AttachedManagedPolicies": attached(group.attached_managed_policies()),
                "AccountID": account_id,
            })
        }));

        roles.extend(page.role_detail_list().iter().map(|role| {
            json!({
                "Path": role.path(),
                "RoleName": role.role_name(),
                "RoleId": role.role_id(),
                "Arn": role.arn(),
                "CreateDate": timestamp(role.create_date()),
                "AssumeRolePolicyDocument": role.assume_role_policy_document(),
                "AttachedManagedPolicies": attached(role.attached_managed_policies()),
                "AccountID": account_id,
            })
        }));

        policies.extend(page.policies().iter().map(|policy| {
            json!({
                "PolicyName": policy.policy_name(),
                "PolicyId": policy.policy_id(),
                "Arn": policy.arn(),
                "Path": policy.path(),
                "DefaultVersionId": policy.default_version_id(),
                "AttachmentCount": policy.attachment_count(),
                "IsAttachable": policy.is_attachable(),
                "CreateDate": timestamp(policy.create_date()),
                "UpdateDate": timestamp(policy.update_date()),
                "AccountID": account_id,
            })
        }));

        match page.marker() {
            Some(next) => marker = Some(next.to_string()),
            None => break,
        }
    }

    Ok(json!({
        "AccountID": account_id,
        "UserDetailList": users,
        "GroupDetailList": groups,
        "RoleDetailList": roles,
        "Policies": policies,
    }))
}

fn attached(policies: &[AttachedPolicy]) -> Vec<Value> {
    policies
        .iter()
        .map(|policy| {
            json!({
                "PolicyName": policy.policy_name(),
                "PolicyArn": policy.policy_arn(),
            })
        })
        .collect()
}

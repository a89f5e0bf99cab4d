//! Subscription-filter provisioning for matched log groups.
//!
//! Create and Update put a deterministically named filter on every log group
//! matching one of the configured patterns. Delete scans all log groups and
//! removes filters carrying the stack's name prefix. Failures on one log
//! group are logged and skipped; they never abort the batch.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::Client as CwClient;
use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Remaining invocation time below which Delete stops scanning.
pub const MIN_REMAINING_TIME: Duration = Duration::from_secs(10);

const FILTER_NAME_PREFIX: &str = "firetiger";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("invalid log group pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("missing resource property {0}")]
    MissingProperty(&'static str),

    #[error("unsupported request type")]
    UnsupportedRequestType,
}

impl ProvisionError {
    fn api<E>(operation: &'static str, err: E) -> Self
    where
        E: std::error::Error,
    {
        ProvisionError::Api {
            operation,
            message: DisplayErrorContext(err).to_string(),
        }
    }
}

/// One page of `DescribeLogGroups`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogGroupPage {
    pub names: Vec<String>,
    pub next_token: Option<String>,
}

/// The CloudWatch Logs calls the provisioner needs.
#[async_trait]
pub trait LogGroupsApi: Send + Sync {
    async fn describe_log_groups(&self, next_token: Option<String>) -> Result<LogGroupPage, ProvisionError>;

    async fn put_subscription_filter(
        &self,
        log_group: &str,
        filter_name: &str,
        filter_pattern: &str,
        destination_arn: &str,
    ) -> Result<(), ProvisionError>;

    async fn subscription_filter_names(&self, log_group: &str) -> Result<Vec<String>, ProvisionError>;

    async fn delete_subscription_filter(&self, log_group: &str, filter_name: &str) -> Result<(), ProvisionError>;
}

/// [`LogGroupsApi`] backed by the AWS SDK.
#[derive(Clone, Debug)]
pub struct CloudWatchLogsApi {
    client: CwClient,
}

impl CloudWatchLogsApi {
    pub fn new(client: CwClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogGroupsApi for CloudWatchLogsApi {
    async fn describe_log_groups(&self, next_token: Option<String>) -> Result<LogGroupPage, ProvisionError> {
        let output = self
            .client
            .describe_log_groups()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|err| ProvisionError::api("DescribeLogGroups", err))?;

        Ok(LogGroupPage {
            names: output
                .log_groups()
                .iter()
                .filter_map(|group| group.log_group_name().map(str::to_string))
                .collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn put_subscription_filter(
        &self,
        log_group: &str,
        filter_name: &str,
        filter_pattern: &str,
        destination_arn: &str,
    ) -> Result<(), ProvisionError> {
        self.client
            .put_subscription_filter()
            .log_group_name(log_group)
            .filter_name(filter_name)
            .filter_pattern(filter_pattern)
            .destination_arn(destination_arn)
            .send()
            .await
            .map_err(|err| ProvisionError::api("PutSubscriptionFilter", err))?;
        Ok(())
    }

    async fn subscription_filter_names(&self, log_group: &str) -> Result<Vec<String>, ProvisionError> {
        let output = self
            .client
            .describe_subscription_filters()
            .log_group_name(log_group)
            .send()
            .await
            .map_err(|err| ProvisionError::api("DescribeSubscriptionFilters", err))?;

        Ok(output
            .subscription_filters()
            .iter()
            .filter_map(|filter| filter.filter_name().map(str::to_string))
            .collect())
    }

    async fn delete_subscription_filter(&self, log_group: &str, filter_name: &str) -> Result<(), ProvisionError> {
        self.client
            .delete_subscription_filter()
            .log_group_name(log_group)
            .filter_name(filter_name)
            .send()
            .await
            .map_err(|err| ProvisionError::api("DeleteSubscriptionFilter", err))?;
        Ok(())
    }
}

/// `firetiger-<stack>-`, shared by every filter a stack creates.
pub fn filter_prefix(stack_name: &str) -> String {
    format!("{FILTER_NAME_PREFIX}-{stack_name}-")
}

/// Deterministic filter name for `log_group` within `stack_name`.
///
/// `/aws/lambda/my_fn` in stack `demo` becomes `firetiger-demo-aws-lambda-my-fn`.
pub fn filter_name(stack_name: &str, log_group: &str) -> String {
    let suffix = log_group.trim_start_matches('/').replace(['/', '_'], "-");
    format!("{}{suffix}", filter_prefix(stack_name))
}

#[derive(Debug, Clone)]
enum GroupPattern {
    Any,
    Search(Regex),
}

/// Matches log group names against the configured patterns.
///
/// `*` matches everything; any other pattern is an unanchored regex search.
#[derive(Debug, Clone)]
pub struct LogGroupMatcher {
    patterns: Vec<GroupPattern>,
}

impl LogGroupMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ProvisionError> {
        let patterns = patterns
            .iter()
            .map(|pattern| match pattern.as_ref() {
                "*" => Ok(GroupPattern::Any),
                other => Regex::new(other)
                    .map(GroupPattern::Search)
                    .map_err(|source| ProvisionError::InvalidPattern {
                        pattern: other.to_string(),
                        source,
                    }),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, log_group: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern {
            GroupPattern::Any => true,
            GroupPattern::Search(regex) => regex.is_match(log_group),
        })
    }
}

/// Everything needed to create filters for one stack.
#[derive(Debug, Clone)]
pub struct FilterSettings {
    pub stack_name: String,
    pub destination_arn: String,
    pub filter_pattern: String,
    pub matcher: LogGroupMatcher,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedFilter {
    pub log_group: String,
    pub filter_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub monitored_log_groups: usize,
    pub created: Vec<CreatedFilter>,
}

impl ProvisionReport {
    /// The `Data` object returned to CloudFormation.
    pub fn response_data(&self) -> Value {
        json!({
            "FilterCount": self.created.len(),
            "MonitoredLogGroups": self.monitored_log_groups,
            "CreatedFilters": self.created,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub stopped_early: bool,
}

/// Wall-clock instant at which the platform kills the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(SystemTime);

impl Deadline {
    pub fn from_epoch_millis(millis: u64) -> Self {
        Self(UNIX_EPOCH + Duration::from_millis(millis))
    }

    #[cfg(test)]
    pub fn after(duration: Duration) -> Self {
        Self(SystemTime::now() + duration)
    }

    pub fn remaining(&self) -> Duration {
        self.0
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }
}

/// Every log group name, following pagination to the end.
pub async fn list_all_log_groups(api: &dyn LogGroupsApi) -> Result<Vec<String>, ProvisionError> {
    let mut names = Vec::new();
    let mut next_token = None;
    loop {
        let page = api.describe_log_groups(next_token).await?;
        names.extend(page.names);
        next_token = page.next_token;
        if next_token.is_none() {
            return Ok(names);
        }
    }
}

/// Puts a subscription filter on every matching log group.
///
/// Only enumeration failures are returned; a group whose filter cannot be
/// created is logged and left out of the report.
pub async fn create_subscription_filters(
    api: &dyn LogGroupsApi,
    settings: &FilterSettings,
) -> Result<ProvisionReport, ProvisionError> {
    let matched: Vec<String> = list_all_log_groups(api)
        .await?
        .into_iter()
        .filter(|log_group| settings.matcher.matches(log_group))
        .collect();
    tracing::info!(matched = matched.len(), "Matched log groups for subscription filters.");

    let mut report = ProvisionReport {
        monitored_log_groups: matched.len(),
        created: Vec::with_capacity(matched.len()),
    };

    for log_group in matched {
        let name = filter_name(&settings.stack_name, &log_group);
        match api
            .put_subscription_filter(&log_group, &name, &settings.filter_pattern, &settings.destination_arn)
            .await
        {
            Ok(()) => {
                tracing::debug!(log_group = %log_group, filter_name = %name, "Created subscription filter.");
                report.created.push(CreatedFilter {
                    log_group,
                    filter_name: name,
                });
            }
            Err(err) => {
                tracing::warn!(log_group = %log_group, error = %err, "Failed to create subscription filter.");
            }
        }
    }

    Ok(report)
}

/// Deletes every filter named with the stack's prefix.
///
/// Best effort: errors are logged and skipped, and scanning stops early once
/// less than [`MIN_REMAINING_TIME`] is left before `deadline`.
pub async fn cleanup_subscription_filters(
    api: &dyn LogGroupsApi,
    stack_name: &str,
    deadline: &Deadline,
) -> CleanupReport {
    let prefix = filter_prefix(stack_name);
    let mut report = CleanupReport::default();
    let mut next_token = None;

    loop {
        let page = match api.describe_log_groups(next_token).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(error = %err, "Error during cleanup, stopping scan.");
                return report;
            }
        };

        for log_group in &page.names {
            if deadline.remaining() < MIN_REMAINING_TIME {
                tracing::warn!(
                    deleted = report.deleted,
                    "Running low on time, stopping cleanup."
                );
                report.stopped_early = true;
                return report;
            }
            report.deleted += delete_prefixed_filters(api, log_group, &prefix).await;
        }

        next_token = page.next_token;
        if next_token.is_none() {
            tracing::info!(deleted = report.deleted, "Deleted subscription filters.");
            return report;
        }
    }
}

async fn delete_prefixed_filters(api: &dyn LogGroupsApi, log_group: &str, prefix: &str) -> usize {
    let names = match api.subscription_filter_names(log_group).await {
        Ok(names) => names,
        Err(err) => {
            tracing::warn!(log_group, error = %err, "Error listing subscription filters.");
            return 0;
        }
    };

    let mut deleted = 0;
    for name in names.iter().filter(|name| name.starts_with(prefix)) {
        tracing::info!(log_group, filter_name = %name, "Deleting subscription filter.");
        match api.delete_subscription_filter(log_group, name).await {
            Ok(()) => deleted += 1,
            Err(err) => tracing::warn!(log_group, filter_name = %name, error = %err, "Error deleting subscription filter."),
        }
    }
    deleted
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    /// In-memory CloudWatch Logs with paged `DescribeLogGroups`.
    pub(crate) struct FakeLogs {
        groups: Vec<String>,
        page_size: usize,
        filters: Mutex<BTreeMap<String, Vec<String>>>,
        failing_groups: HashSet<String>,
        fail_describe: bool,
        puts: Mutex<Vec<(String, String, String, String)>>,
        deletes: Mutex<Vec<(String, String)>>,
    }

    impl FakeLogs {
        pub(crate) fn new(groups: &[&str]) -> Self {
            Self {
                groups: groups.iter().map(|group| group.to_string()).collect(),
                page_size: 2,
                filters: Mutex::new(BTreeMap::new()),
                failing_groups: HashSet::new(),
                fail_describe: false,
                puts: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_filters(self, log_group: &str, names: &[&str]) -> Self {
            self.filters.lock().unwrap().insert(
                log_group.to_string(),
                names.iter().map(|name| name.to_string()).collect(),
            );
            self
        }

        pub(crate) fn failing_for(mut self, log_group: &str) -> Self {
            self.failing_groups.insert(log_group.to_string());
            self
        }

        pub(crate) fn failing_describe(mut self) -> Self {
            self.fail_describe = true;
            self
        }

        pub(crate) fn puts(&self) -> Vec<(String, String, String, String)> {
            self.puts.lock().unwrap().clone()
        }

        pub(crate) fn deletes(&self) -> Vec<(String, String)> {
            self.deletes.lock().unwrap().clone()
        }

        fn failure(operation: &'static str) -> ProvisionError {
            ProvisionError::Api {
                operation,
                message: "AccessDeniedException".to_string(),
            }
        }
    }

    #[async_trait]
    impl LogGroupsApi for FakeLogs {
        async fn describe_log_groups(&self, next_token: Option<String>) -> Result<LogGroupPage, ProvisionError> {
            if self.fail_describe {
                return Err(Self::failure("DescribeLogGroups"));
            }
            let start: usize = next_token.map(|token| token.parse().unwrap()).unwrap_or(0);
            let end = (start + self.page_size).min(self.groups.len());
            Ok(LogGroupPage {
                names: self.groups[start..end].to_vec(),
                next_token: (end < self.groups.len()).then(|| end.to_string()),
            })
        }

        async fn put_subscription_filter(
            &self,
            log_group: &str,
            filter_name: &str,
            filter_pattern: &str,
            destination_arn: &str,
        ) -> Result<(), ProvisionError> {
            if self.failing_groups.contains(log_group) {
                return Err(Self::failure("PutSubscriptionFilter"));
            }
            self.puts.lock().unwrap().push((
                log_group.to_string(),
                filter_name.to_string(),
                filter_pattern.to_string(),
                destination_arn.to_string(),
            ));
            Ok(())
        }

        async fn subscription_filter_names(&self, log_group: &str) -> Result<Vec<String>, ProvisionError> {
            if self.failing_groups.contains(log_group) {
                return Err(Self::failure("DescribeSubscriptionFilters"));
            }
            Ok(self
                .filters
                .lock()
                .unwrap()
                .get(log_group)
                .cloned()
                .unwrap_or_default())
        }

        async fn delete_subscription_filter(&self, log_group: &str, filter_name: &str) -> Result<(), ProvisionError> {
            self.deletes
                .lock()
                .unwrap()
                .push((log_group.to_string(), filter_name.to_string()));
            Ok(())
        }
    }

    fn settings(patterns: &[&str]) -> FilterSettings {
        FilterSettings {
            stack_name: "demo".to_string(),
            destination_arn: "arn:aws:lambda:us-east-1:123456789012:function:ingester".to_string(),
            filter_pattern: String::new(),
            matcher: LogGroupMatcher::new(patterns).unwrap(),
        }
    }

    #[test]
    fn test_filter_name_derivation() {
        assert_eq!(filter_name("demo", "/aws/lambda/my_fn"), "firetiger-demo-aws-lambda-my-fn");
        assert_eq!(filter_name("demo", "ecs_app/api"), "firetiger-demo-ecs-app-api");
        assert!(filter_name("demo", "/x").starts_with(&filter_prefix("demo")));
    }

    #[test]
    fn test_star_matches_everything() {
        let matcher = LogGroupMatcher::new(&["*"]).unwrap();
        for group in ["/aws/lambda/a", "/ecs/b", "anything", ""] {
            assert!(matcher.matches(group), "{group}");
        }
    }

    #[test]
    fn test_patterns_are_regex_searches() {
        let matcher = LogGroupMatcher::new(&["^/aws/lambda/"]).unwrap();
        assert!(matcher.matches("/aws/lambda/checkout"));
        assert!(!matcher.matches("/ecs/aws/lambda/checkout"));
        assert!(!matcher.matches("/ecs/api"));

        let matcher = LogGroupMatcher::new(&["lambda", "^/ecs/"]).unwrap();
        assert!(matcher.matches("/ecs/aws/lambda/checkout"));
        assert!(matcher.matches("/ecs/api"));
        assert!(!matcher.matches("/rds/cluster"));

        let matcher = LogGroupMatcher::new::<&str>(&[]).unwrap();
        assert!(!matcher.matches("/aws/lambda/checkout"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = LogGroupMatcher::new(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
        assert_eq!(err.to_string(), "invalid log group pattern \"(unclosed\"");
    }

    #[test]
    fn test_deadline_remaining() {
        assert_eq!(Deadline::from_epoch_millis(0).remaining(), Duration::ZERO);
        assert!(Deadline::after(Duration::from_secs(60)).remaining() > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_create_filters_for_matched_groups_across_pages() {
        let api = FakeLogs::new(&["/aws/lambda/a_b", "/ecs/x", "/aws/lambda/c", "/rds/d", "/aws/lambda/e"]);

        let report = create_subscription_filters(&api, &settings(&["^/aws/lambda/"]))
            .await
            .unwrap();

        assert_eq!(report.monitored_log_groups, 3);
        assert_eq!(
            report.created,
            vec![
                CreatedFilter {
                    log_group: "/aws/lambda/a_b".to_string(),
                    filter_name: "firetiger-demo-aws-lambda-a-b".to_string(),
                },
                CreatedFilter {
                    log_group: "/aws/lambda/c".to_string(),
                    filter_name: "firetiger-demo-aws-lambda-c".to_string(),
                },
                CreatedFilter {
                    log_group: "/aws/lambda/e".to_string(),
                    filter_name: "firetiger-demo-aws-lambda-e".to_string(),
                },
            ]
        );
        let puts = api.puts();
        assert_eq!(puts.len(), 3);
        assert_eq!(puts[0].3, "arn:aws:lambda:us-east-1:123456789012:function:ingester");
    }

    #[tokio::test]
    async fn test_per_group_failure_does_not_abort_batch() {
        let api = FakeLogs::new(&["/aws/lambda/a", "/aws/lambda/b", "/aws/lambda/c"]).failing_for("/aws/lambda/b");

        let report = create_subscription_filters(&api, &settings(&["*"])).await.unwrap();

        assert_eq!(report.monitored_log_groups, 3);
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.response_data()["FilterCount"], 2);
        assert_eq!(report.response_data()["MonitoredLogGroups"], 3);
        assert_eq!(
            report.response_data()["CreatedFilters"][1],
            json!({"logGroup": "/aws/lambda/c", "filterName": "firetiger-demo-aws-lambda-c"})
        );
    }

    #[tokio::test]
    async fn test_create_fails_when_log_groups_cannot_be_listed() {
        let api = FakeLogs::new(&["/aws/lambda/a"]).failing_describe();
        let err = create_subscription_filters(&api, &settings(&["*"])).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Api { operation: "DescribeLogGroups", .. }));
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_prefixed_filters() {
        let api = FakeLogs::new(&["/aws/lambda/a", "/aws/lambda/b", "/ecs/c"])
            .with_filters("/aws/lambda/a", &["firetiger-demo-aws-lambda-a", "someone-elses"])
            .with_filters("/aws/lambda/b", &["firetiger-other-aws-lambda-b"])
            .with_filters("/ecs/c", &["firetiger-demo-ecs-c"]);

        let report = cleanup_subscription_filters(&api, "demo", &Deadline::after(Duration::from_secs(300))).await;

        assert_eq!(
            report,
            CleanupReport {
                deleted: 2,
                stopped_early: false
            }
        );
        assert_eq!(
            api.deletes(),
            vec![
                ("/aws/lambda/a".to_string(), "firetiger-demo-aws-lambda-a".to_string()),
                ("/ecs/c".to_string(), "firetiger-demo-ecs-c".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_skips_failing_groups() {
        let api = FakeLogs::new(&["/aws/lambda/a", "/aws/lambda/b"])
            .with_filters("/aws/lambda/b", &["firetiger-demo-aws-lambda-b"])
            .failing_for("/aws/lambda/a");

        let report = cleanup_subscription_filters(&api, "demo", &Deadline::after(Duration::from_secs(300))).await;
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn test_cleanup_stops_when_time_is_short() {
        let api = FakeLogs::new(&["/aws/lambda/a"]).with_filters("/aws/lambda/a", &["firetiger-demo-aws-lambda-a"]);

        let report = cleanup_subscription_filters(&api, "demo", &Deadline::after(Duration::from_secs(5))).await;

        assert!(report.stopped_early);
        assert_eq!(report.deleted, 0);
        assert!(api.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_listing_failure() {
        let api = FakeLogs::new(&["/aws/lambda/a"]).failing_describe();
        let report = cleanup_subscription_filters(&api, "demo", &Deadline::after(Duration::from_secs(300))).await;
        assert_eq!(report, CleanupReport::default());
    }
}

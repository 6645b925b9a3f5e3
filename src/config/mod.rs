//! Stack configuration.
//!
//! A config script is a rhai script whose last expression is an object map,
//! eg:
//!
//! ```rhai
//! #{
//!     stack_name: "my-site",
//!     staging_bucket: env("STAGING_BUCKET"),
//!     memory_limit: 1024,
//! }
//! ```
//!
//! Keys that are left out keep their default. Unknown keys and values of
//! the wrong type are errors rather than being ignored.

use std::path::{Path, PathBuf};

use rhai::{Dynamic, Engine, Map};

use crate::context::validate_stack_name;
use crate::error::{Error, Result};
use crate::resources::{ErrorResponse, ViewerProtocolPolicy, CUSTOMIZABLE_ERROR_CODES, VALID_LOG_RETENTION_DAYS};
use crate::template::RemovalPolicy;

pub const TRACING_TARGET_CONFIG: &str = "sitestack::config";

#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    pub stack_name: String,
    /// id of the site construct under the stack root.
    pub construct_id: String,
    pub region: String,
    /// the account the distribution lives in. Defaults to whichever
    /// account deploys the stack.
    pub account_id: Option<String>,
    pub asset_path: PathBuf,
    /// bucket the zipped asset is uploaded to before deploying.
    pub staging_bucket: Option<String>,
    pub default_root_object: String,
    pub error_responses: Vec<ErrorResponse>,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub distribution_paths: Vec<String>,
    pub memory_limit: u32,
    pub log_retention_days: u32,
    pub prune: bool,
    pub removal_policy: RemovalPolicy,
    pub auto_delete_objects: bool,
    pub comment: Option<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: "static-site".to_string(),
            construct_id: "DeploymentService".to_string(),
            region: "us-east-1".to_string(),
            account_id: None,
            asset_path: PathBuf::from("./resources/browser"),
            staging_bucket: None,
            default_root_object: "index.html".to_string(),
            error_responses: vec![ErrorResponse::spa_fallback(404, "/index.html")],
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
            distribution_paths: vec!["/*".to_string()],
            memory_limit: 512,
            log_retention_days: 1,
            prune: true,
            removal_policy: RemovalPolicy::Destroy,
            auto_delete_objects: true,
            comment: None,
        }
    }
}

fn build_engine() -> Engine {
    let mut engine = Engine::new();
    // env("NAME") is () when unset, so scripts can fall back with `??`
    engine.register_fn("env", |name: &str| -> Dynamic {
        match std::env::var(name) {
            Ok(v) => Dynamic::from(v),
            Err(_) => Dynamic::UNIT,
        }
    });
    engine.register_fn("env", |name: &str, default: &str| -> String {
        std::env::var(name).unwrap_or_else(|_| default.to_string())
    });
    engine
}

fn expect_string(key: &str, value: Dynamic) -> Result<String> {
    let type_name = value.type_name();
    value.into_string().map_err(|_| Error::config(key, format!("expected a string, found {type_name}")))
}

fn expect_optional_string(key: &str, value: Dynamic) -> Result<Option<String>> {
    if value.is_unit() {
        return Ok(None);
    }
    expect_string(key, value).map(Some)
}

fn expect_u32(key: &str, value: Dynamic) -> Result<u32> {
    let type_name = value.type_name();
    let n = value.as_int().map_err(|_| Error::config(key, format!("expected an integer, found {type_name}")))?;
    u32::try_from(n).map_err(|_| Error::config(key, format!("{n} is out of range")))
}

fn expect_bool(key: &str, value: Dynamic) -> Result<bool> {
    let type_name = value.type_name();
    value.as_bool().map_err(|_| Error::config(key, format!("expected a boolean, found {type_name}")))
}

fn expect_string_array(key: &str, value: Dynamic) -> Result<Vec<String>> {
    let type_name = value.type_name();
    let array = value.into_array().map_err(|_| Error::config(key, format!("expected an array of strings, found {type_name}")))?;
    array.into_iter().map(|item| expect_string(key, item)).collect()
}

fn parse_error_response(value: Dynamic) -> Result<ErrorResponse> {
    let key = "error_responses";
    let type_name = value.type_name();
    let map = value.try_cast::<Map>()
        .ok_or_else(|| Error::config(key, format!("expected an array of maps, found an array of {type_name}")))?;
    let mut http_status = None;
    let mut response_http_status = 200;
    let mut response_page_path = None;
    let mut ttl_seconds = None;
    for (field, val) in map {
        match field.as_str() {
            "http_status" => http_status = Some(expect_u32(key, val)?),
            "response_http_status" => response_http_status = expect_u32(key, val)?,
            "response_page_path" => response_page_path = Some(expect_string(key, val)?),
            "ttl_seconds" => ttl_seconds = Some(expect_u32(key, val)?),
            x => return Err(Error::config(key, format!("unexpected field '{x}'"))),
        }
    }
    let http_status = http_status.ok_or_else(|| Error::config(key, "missing 'http_status'"))?;
    let response_page_path = response_page_path.ok_or_else(|| Error::config(key, "missing 'response_page_path'"))?;
    let to_status = |n: u32| u16::try_from(n).map_err(|_| Error::config(key, format!("{n} is not an http status")));
    Ok(ErrorResponse {
        http_status: to_status(http_status)?,
        response_http_status: to_status(response_http_status)?,
        response_page_path,
        ttl_seconds,
    })
}

/// `<area>(-<word>)+-<digit>`, eg: us-east-1, ap-southeast-2, us-gov-west-1
fn is_region_name(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() < 3 {
        return false;
    }
    let (area, rest) = (parts[0], &parts[1..]);
    let (number, words) = match rest.split_last() {
        Some(split) => split,
        None => return false,
    };
    area.len() == 2
        && area.chars().all(|c| c.is_ascii_lowercase())
        && words.iter().all(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_lowercase()))
        && number.len() == 1
        && number.chars().all(|c| c.is_ascii_digit())
}

/// S3 naming rules: 3 to 63 lowercase letters, digits, dots and hyphens,
/// starting and ending with a letter or digit.
fn is_bucket_name(bucket: &str) -> bool {
    let edge_ok = |c: Option<char>| c.map_or(false, |c| c.is_ascii_lowercase() || c.is_ascii_digit());
    (3..=63).contains(&bucket.len())
        && bucket.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
        && edge_ok(bucket.chars().next())
        && edge_ok(bucket.chars().last())
        && !bucket.contains("..")
}

impl StackConfig {
    /// evaluates a config script and applies the map it returns over the defaults.
    pub fn load_script<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let script = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_script(&script, path)
    }

    /// `origin` is only used in error messages.
    pub fn from_script(script: &str, origin: &Path) -> Result<Self> {
        let engine = build_engine();
        let map = engine.eval::<Map>(script).map_err(|e| Error::Script {
            path: origin.to_path_buf(),
            reason: match *e {
                rhai::EvalAltResult::ErrorMismatchOutputType(_, _, _) => {
                    "config script must evaluate to an object map, eg: #{ stack_name: \"my-site\" }".to_string()
                }
                other => other.to_string(),
            },
        })?;
        let mut config = StackConfig::default();
        for (key, value) in map {
            config.apply(key.as_str(), value)?;
        }
        tracing::debug!(target: TRACING_TARGET_CONFIG, path = %origin.display(), ?config, "loaded config script");
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: Dynamic) -> Result<()> {
        match key {
            "stack_name" => self.stack_name = expect_string(key, value)?,
            "construct_id" => self.construct_id = expect_string(key, value)?,
            "region" => self.region = expect_string(key, value)?,
            "account_id" => self.account_id = expect_optional_string(key, value)?,
            "asset_path" => self.asset_path = PathBuf::from(expect_string(key, value)?),
            "staging_bucket" => self.staging_bucket = expect_optional_string(key, value)?,
            "default_root_object" => self.default_root_object = expect_string(key, value)?,
            "error_responses" => {
                let type_name = value.type_name();
                let array = value.into_array()
                    .map_err(|_| Error::config(key, format!("expected an array, found {type_name}")))?;
                self.error_responses = array.into_iter().map(parse_error_response).collect::<Result<_>>()?;
            }
            "viewer_protocol_policy" => {
                self.viewer_protocol_policy = expect_string(key, value)?.parse().map_err(|e: String| Error::config(key, e))?;
            }
            "distribution_paths" => self.distribution_paths = expect_string_array(key, value)?,
            "memory_limit" => self.memory_limit = expect_u32(key, value)?,
            "log_retention_days" => self.log_retention_days = expect_u32(key, value)?,
            "prune" => self.prune = expect_bool(key, value)?,
            "removal_policy" => {
                self.removal_policy = expect_string(key, value)?.parse().map_err(|e: String| Error::config(key, e))?;
            }
            "auto_delete_objects" => self.auto_delete_objects = expect_bool(key, value)?,
            "comment" => self.comment = expect_optional_string(key, value)?,
            x => return Err(Error::config(x, "unknown config key")),
        }
        Ok(())
    }

    /// checks everything that can be checked before synthesizing.
    pub fn validate(&self) -> Result<()> {
        validate_stack_name(&self.stack_name)?;
        if self.construct_id.is_empty() || self.construct_id.contains('/') {
            return Err(Error::InvalidConstructId { id: self.construct_id.clone() });
        }
        if !is_region_name(&self.region) {
            return Err(Error::config("region", format!("'{}' is not a region name, eg: us-east-1", self.region)));
        }
        if let Some(account) = &self.account_id {
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::config("account_id", format!("'{account}' is not a 12 digit account id")));
            }
        }
        if let Some(bucket) = &self.staging_bucket {
            if !is_bucket_name(bucket) {
                return Err(Error::config("staging_bucket", format!("'{bucket}' is not a valid S3 bucket name")));
            }
        }
        if self.default_root_object.is_empty() || self.default_root_object.starts_with('/') {
            return Err(Error::config("default_root_object", "must be a non-empty object key without a leading '/'"));
        }
        for response in self.error_responses.iter() {
            if !CUSTOMIZABLE_ERROR_CODES.contains(&response.http_status) {
                return Err(Error::config("error_responses", format!("CloudFront cannot customize responses for status {}", response.http_status)));
            }
            if !response.response_page_path.starts_with('/') {
                return Err(Error::config("error_responses", format!("response page path '{}' must start with '/'", response.response_page_path)));
            }
        }
        if self.distribution_paths.is_empty() {
            return Err(Error::config("distribution_paths", "must invalidate at least one path"));
        }
        if let Some(bad) = self.distribution_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(Error::config("distribution_paths", format!("invalidation path '{bad}' must start with '/'")));
        }
        if !(128..=10240).contains(&self.memory_limit) {
            return Err(Error::config("memory_limit", format!("{} MB is outside of 128..=10240", self.memory_limit)));
        }
        if !VALID_LOG_RETENTION_DAYS.contains(&self.log_retention_days) {
            return Err(Error::config("log_retention_days", format!("{} is not a retention period CloudWatch supports", self.log_retention_days)));
        }
        if self.auto_delete_objects && self.removal_policy != RemovalPolicy::Destroy {
            return Err(Error::config("auto_delete_objects", "requires removal_policy 'destroy'"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FIXTURES: &str = "./src/config/test_fixtures";

    fn fixture(name: &str) -> PathBuf {
        Path::new(FIXTURES).join(name)
    }

    #[test]
    fn defaults_are_valid() {
        let config = StackConfig::default();
        config.validate().unwrap();
        assert_eq!(config.memory_limit, 512);
        assert_eq!(config.log_retention_days, 1);
        assert_eq!(config.distribution_paths, vec!["/*"]);
        assert_eq!(config.error_responses, vec![ErrorResponse::spa_fallback(404, "/index.html")]);
    }

    #[test]
    fn script_overrides_defaults() {
        let config = StackConfig::load_script(fixture("site.rhai")).unwrap();
        assert_eq!(config.stack_name, "marketing-site");
        assert_eq!(config.account_id.as_deref(), Some("123456789012"));
        assert_eq!(config.staging_bucket.as_deref(), Some("my-staging-bucket"));
        assert_eq!(config.memory_limit, 1024);
        assert_eq!(config.viewer_protocol_policy, ViewerProtocolPolicy::HttpsOnly);
        assert_eq!(config.distribution_paths, vec!["/index.html", "/assets/*"]);
        assert_eq!(config.error_responses.len(), 2);
        assert_eq!(config.error_responses[1].http_status, 403);
        assert_eq!(config.error_responses[1].ttl_seconds, Some(10));
        assert!(!config.prune);
        // untouched keys keep their defaults
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.log_retention_days, 1);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = StackConfig::load_script(fixture("unknown_key.rhai")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "memory_limt"), "{err}");
    }

    #[test]
    fn wrong_types_are_rejected() {
        let err = StackConfig::load_script(fixture("wrong_type.rhai")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "memory_limit"), "{err}");
    }

    #[test]
    fn scripts_can_read_env() {
        std::env::set_var("SITESTACK_TEST_STAGING_BUCKET", "bucket-from-env");
        std::env::remove_var("SITESTACK_TEST_UNSET_ACCOUNT");
        let config = StackConfig::load_script(fixture("env.rhai")).unwrap();
        assert_eq!(config.staging_bucket.as_deref(), Some("bucket-from-env"));
        assert_eq!(config.account_id, None);
        assert_eq!(config.region, "eu-west-1");
    }

    #[test]
    fn script_must_return_a_map() {
        let err = StackConfig::from_script("40 + 2", Path::new("inline.rhai")).unwrap_err();
        assert!(matches!(err, Error::Script { .. }), "{err}");
        let err = StackConfig::from_script("#{ stack_name: ", Path::new("inline.rhai")).unwrap_err();
        assert!(matches!(err, Error::Script { .. }), "{err}");
    }

    #[test]
    fn region_and_bucket_names() {
        for region in ["us-east-1", "eu-west-3", "ap-southeast-2", "us-gov-west-1"] {
            assert!(is_region_name(region), "{region}");
        }
        for region in ["us-east", "US-EAST-1", "us-east-12", "us--1", "us-east-1 "] {
            assert!(!is_region_name(region), "{region}");
        }
        for bucket in ["my-staging-bucket", "site.assets.2024", "abc"] {
            assert!(is_bucket_name(bucket), "{bucket}");
        }
        for bucket in ["-bucket", "bucket-", "a..b", "bucket/key", "b'ucket", "a".repeat(64).as_str()] {
            assert!(!is_bucket_name(bucket), "{bucket}");
        }
    }

    #[test]
    fn validate_rejects_bad_values() {
        let cases: Vec<(&str, fn(&mut StackConfig))> = vec![
            ("memory_limit", |c| c.memory_limit = 64),
            ("log_retention_days", |c| c.log_retention_days = 2),
            ("distribution_paths", |c| c.distribution_paths = vec!["index.html".into()]),
            ("distribution_paths", |c| c.distribution_paths.clear()),
            ("auto_delete_objects", |c| c.removal_policy = RemovalPolicy::Retain),
            ("account_id", |c| c.account_id = Some("1234".into())),
            ("error_responses", |c| c.error_responses = vec![ErrorResponse::spa_fallback(200, "/index.html")]),
            ("default_root_object", |c| c.default_root_object = "/index.html".into()),
            ("region", |c| c.region = "us-east-1; touch /tmp/owned;".into()),
            ("region", |c| c.region = "useast1".into()),
            ("region", |c| c.region = String::new()),
            ("staging_bucket", |c| c.staging_bucket = Some(r#"bucket"$(id)""#.into())),
            ("staging_bucket", |c| c.staging_bucket = Some("My_Bucket".into())),
            ("staging_bucket", |c| c.staging_bucket = Some("ab".into())),
        ];
        for (expected_key, mutate) in cases {
            let mut config = StackConfig::default();
            mutate(&mut config);
            match config.validate() {
                Err(Error::InvalidConfig { key, .. }) => assert_eq!(key, expected_key),
                other => panic!("expected invalid {expected_key}, got {other:?}"),
            }
        }

        let mut config = StackConfig::default();
        config.stack_name = "9-lives".into();
        assert!(matches!(config.validate(), Err(Error::InvalidStackName { .. })));
    }
}

use super::*;
use crate::assets::StagedAsset;
use crate::config::StackConfig;

pub const ASSETS_BUCKET_PARAMETER: &str = "AssetsBucket";
pub const ASSETS_OBJECT_KEY_PARAMETER: &str = "AssetsObjectKey";
pub const DEPLOYMENT_NONCE_PARAMETER: &str = "DeploymentNonce";
pub const BUCKET_NAME_OUTPUT: &str = "BucketName";
pub const CLOUDFRONT_URL_OUTPUT: &str = "CloudFrontURL";

pub const INVALIDATION_ACTIONS: &[&str] = &["cloudfront:GetInvalidation", "cloudfront:CreateInvalidation"];

/// template names of what a [`StaticSite`] declares outside its resources.
/// Each is the site's construct path followed by the matching `*_PARAMETER`
/// or `*_OUTPUT` id, so several sites can share a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteNames {
    pub assets_bucket: String,
    pub assets_object_key: String,
    pub deployment_nonce: String,
    pub bucket_name_output: String,
    pub cloudfront_url_output: String,
}

/// a single page app served from a private bucket through a distribution.
///
/// Declares, in order: the bucket, the distribution in front of it, a role
/// that may only invalidate that distribution, and the deployment that
/// uploads the staged asset and invalidates the cache on every deploy.
/// The bucket name and the https url of the distribution are stack outputs.
#[derive(Debug, Clone)]
pub struct StaticSite {
    pub bucket: Bucket,
    pub distribution: Distribution,
    pub role: Role,
    pub deployment: BucketDeployment,
    pub names: SiteNames,
}

impl StaticSite {
    pub fn new(scope: &mut Scope<'_>, id: &str, config: &StackConfig, asset: &StagedAsset) -> Result<Self> {
        warn_missing_pages(config, asset);
        let mut site_scope = scope.child(id)?;

        let bucket = Bucket::new(&mut site_scope, "FrontendBucket", &BucketProps {
            removal_policy: config.removal_policy,
            auto_delete_objects: config.auto_delete_objects,
        })?;

        let distribution = Distribution::new(&mut site_scope, "CloudfrontDistribution", DistributionProps {
            origin: &bucket,
            viewer_protocol_policy: config.viewer_protocol_policy,
            default_root_object: config.default_root_object.clone(),
            error_responses: config.error_responses.clone(),
            comment: config.comment.clone(),
        })?;

        let mut role_props = RoleProps::assumed_by("lambda.amazonaws.com");
        role_props.description = Some("invalidates the site distribution after a deployment".into());
        role_props.inline_policies.push(InlinePolicy {
            policy_name: "InvalidationPolicy".into(),
            policy_document: PolicyDocument::new(vec![PolicyStatement::allow(
                INVALIDATION_ACTIONS,
                vec![distribution.arn(config.account_id.as_deref())],
            )]),
        });
        let role = Role::new(&mut site_scope, "BucketDeploymentRole", role_props)?;

        let assets_bucket = site_scope.add_parameter(ASSETS_BUCKET_PARAMETER, "bucket the site asset zip is staged in")?;
        let assets_object_key = site_scope.add_parameter(ASSETS_OBJECT_KEY_PARAMETER, "object key of the staged site asset zip")?;
        let deployment_nonce = site_scope.add_parameter(DEPLOYMENT_NONCE_PARAMETER, "changes on every deploy so the cache is always invalidated")?;

        let deployment = BucketDeployment::new(&mut site_scope, "BucketDeployment", BucketDeploymentProps {
            source: AssetSource {
                bucket_name: get_ref(&assets_bucket),
                object_key: get_ref(&assets_object_key),
                sub_location: format!("${{{assets_bucket}}}/${{{assets_object_key}}}"),
            },
            destination_bucket: &bucket,
            distribution: &distribution,
            distribution_paths: config.distribution_paths.clone(),
            role: &role,
            memory_limit: config.memory_limit,
            log_retention_days: config.log_retention_days,
            prune: config.prune,
            deployment_nonce: get_ref(&deployment_nonce),
        })?;

        let bucket_name_output = site_scope.add_output(
            BUCKET_NAME_OUTPUT,
            "name of the bucket holding the site",
            bucket.bucket_name(),
        )?;
        let cloudfront_url_output = site_scope.add_output(
            CLOUDFRONT_URL_OUTPUT,
            "https url of the site",
            join("", vec![json!("https://"), distribution.domain_name()]),
        )?;

        let names = SiteNames {
            assets_bucket,
            assets_object_key,
            deployment_nonce,
            bucket_name_output,
            cloudfront_url_output,
        };
        Ok(StaticSite { bucket, distribution, role, deployment, names })
    }
}

/// the site still deploys without these, but viewers would get errors
/// instead of the app.
fn warn_missing_pages(config: &StackConfig, asset: &StagedAsset) {
    let pages = std::iter::once(config.default_root_object.as_str())
        .chain(config.error_responses.iter().map(|r| r.response_page_path.as_str()));
    for page in pages {
        if !asset.contains(page) {
            tracing::warn!(
                target: crate::TRACING_TARGET_SYNTH,
                page,
                source = %asset.source_dir.display(),
                "asset directory has no such page"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::template::references;

    fn staged_site() -> (tempfile::TempDir, StagedAsset) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>app</html>").unwrap();
        let asset = StagedAsset::stage(dir.path()).unwrap();
        (dir, asset)
    }

    fn site_with(config: &StackConfig) -> (Stack, StaticSite) {
        let (_dir, asset) = staged_site();
        let mut stack = Stack::new(&config.stack_name).unwrap();
        let site = {
            let mut root = stack.root();
            StaticSite::new(&mut root, &config.construct_id, config, &asset).unwrap()
        };
        (stack, site)
    }

    #[test]
    fn bucket_is_private_and_auto_deleted() {
        let (stack, site) = site_with(&StackConfig::default());
        let template = stack.template();
        let bucket = &template.resources[&site.bucket.logical_id];
        for flag in ["BlockPublicAcls", "BlockPublicPolicy", "IgnorePublicAcls", "RestrictPublicBuckets"] {
            assert_eq!(bucket.properties["PublicAccessBlockConfiguration"][flag], true);
        }
        assert_eq!(bucket.deletion_policy.as_deref(), Some("Delete"));
        let cleanup = site.bucket.auto_delete.as_ref().unwrap();
        assert!(references(&template.resources[cleanup].properties).contains(&site.bucket.logical_id));
        assert_eq!(
            stack.construct_path(&site.bucket.logical_id),
            Some("DeploymentService/FrontendBucket/Resource")
        );
    }

    #[test]
    fn distribution_enforces_https_with_spa_fallback() {
        let (stack, site) = site_with(&StackConfig::default());
        let config = &stack.template().resources[&site.distribution.logical_id].properties["DistributionConfig"];
        assert_eq!(config["DefaultCacheBehavior"]["ViewerProtocolPolicy"], "redirect-to-https");
        assert_eq!(config["DefaultRootObject"], "index.html");
        assert_eq!(config["CustomErrorResponses"], json!([{
            "ErrorCode": 404,
            "ResponseCode": 200,
            "ResponsePagePath": "/index.html",
        }]));

        let mut https_only = StackConfig::default();
        https_only.viewer_protocol_policy = ViewerProtocolPolicy::HttpsOnly;
        let (stack, site) = site_with(&https_only);
        let config = &stack.template().resources[&site.distribution.logical_id].properties["DistributionConfig"];
        assert_eq!(config["DefaultCacheBehavior"]["ViewerProtocolPolicy"], "https-only");
    }

    #[test]
    fn role_can_only_invalidate_the_distribution() {
        let (stack, site) = site_with(&StackConfig::default());
        let role = &stack.template().resources[&site.role.logical_id];
        assert_eq!(role.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"], "lambda.amazonaws.com");

        let policies = role.properties["Policies"].as_array().unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0]["PolicyName"], "InvalidationPolicy");
        let document = &site.role.inline_policies[0].policy_document;
        assert_eq!(document.actions(), INVALIDATION_ACTIONS.to_vec());
        assert!(document.statement.iter().all(|s| !s.has_wildcard_resource()));
        assert!(document.actions().iter().all(|a| !a.starts_with("s3:")));
        assert_eq!(
            document.statement[0].resource,
            vec![sub(format!(
                "arn:${{AWS::Partition}}:cloudfront::${{AWS::AccountId}}:distribution/${{{}}}",
                site.distribution.logical_id
            ))]
        );
    }

    #[test]
    fn explicit_account_id_is_used_in_the_distribution_arn() {
        let mut config = StackConfig::default();
        config.account_id = Some("123456789012".into());
        let (_, site) = site_with(&config);
        let resource = &site.role.inline_policies[0].policy_document.statement[0].resource[0];
        assert!(resource["Fn::Sub"].as_str().unwrap().contains("cloudfront::123456789012:distribution/"));
    }

    #[test]
    fn every_deploy_invalidates_everything() {
        let (stack, site) = site_with(&StackConfig::default());
        let template = stack.template();
        let custom = &template.resources[&site.deployment.logical_id].properties;
        assert_eq!(custom["DistributionPaths"], json!(["/*"]));
        assert_eq!(custom["DeploymentNonce"], get_ref(&site.names.deployment_nonce));
        assert_eq!(custom["SourceBucketName"], get_ref(&site.names.assets_bucket));
        assert_eq!(custom["SourceObjectKey"], get_ref(&site.names.assets_object_key));
        assert_eq!(custom["DistributionId"], get_ref(&site.distribution.logical_id));
        assert!(template.parameters.contains_key(&site.names.deployment_nonce));

        let function = &template.resources[&site.deployment.function.logical_id].properties;
        assert_eq!(function["MemorySize"], 512);
        assert_eq!(function["Role"], site.role.arn());
        let log_group = site.deployment.function.log_group.as_ref().unwrap();
        assert_eq!(template.resources[log_group].properties["RetentionInDays"], 1);
    }

    #[test]
    fn resources_are_created_in_dependency_order() {
        let (stack, site) = site_with(&StackConfig::default());
        let order = stack.template().creation_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos(&site.bucket.logical_id) < pos(&site.distribution.logical_id));
        assert!(pos(&site.distribution.logical_id) < pos(&site.role.logical_id));
        assert!(pos(&site.role.logical_id) < pos(&site.deployment.logical_id));
        assert!(pos(&site.deployment.grants.logical_id) < pos(&site.deployment.logical_id));
    }

    #[test]
    fn outputs_name_the_bucket_and_url() {
        let (stack, site) = site_with(&StackConfig::default());
        let outputs = &stack.template().outputs;
        assert_eq!(outputs.len(), 2);
        assert_eq!(site.names.bucket_name_output, "DeploymentServiceBucketName");
        assert_eq!(site.names.cloudfront_url_output, "DeploymentServiceCloudFrontURL");
        assert_eq!(outputs[&site.names.bucket_name_output].value, get_ref(&site.bucket.logical_id));
        assert_eq!(
            outputs[&site.names.cloudfront_url_output].value,
            json!({ "Fn::Join": ["", ["https://", get_att(&site.distribution.logical_id, "DomainName")]] })
        );
    }

    #[test]
    fn logical_ids_are_deterministic() {
        let (a, _) = site_with(&StackConfig::default());
        let (b, _) = site_with(&StackConfig::default());
        let ids = |s: &Stack| s.template().resources.keys().cloned().collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn two_sites_share_a_stack() {
        let (_dir, asset) = staged_site();
        let config = StackConfig::default();
        let mut stack = Stack::new("test").unwrap();
        let (a, b) = {
            let mut root = stack.root();
            let a = StaticSite::new(&mut root, "SiteA", &config, &asset).unwrap();
            let b = StaticSite::new(&mut root, "SiteB", &config, &asset).unwrap();
            (a, b)
        };
        assert_eq!(a.names.assets_bucket, "SiteAAssetsBucket");
        assert_eq!(b.names.assets_bucket, "SiteBAssetsBucket");
        assert_ne!(a.bucket.logical_id, b.bucket.logical_id);

        let template = stack.template();
        assert_eq!(template.parameters.len(), 6);
        assert_eq!(template.outputs.len(), 4);
        let custom = &template.resources[&b.deployment.logical_id].properties;
        assert_eq!(custom["SourceBucketName"], get_ref("SiteBAssetsBucket"));
        let grants = &b.deployment.grants.document.statement[0].resource[0];
        assert_eq!(grants["Fn::Sub"], "arn:${AWS::Partition}:s3:::${SiteBAssetsBucket}/${SiteBAssetsObjectKey}");
        assert!(template.creation_order().is_ok());
    }

    #[test]
    fn second_site_with_same_id_is_rejected() {
        let (_dir, asset) = staged_site();
        let config = StackConfig::default();
        let mut stack = Stack::new("test").unwrap();
        let mut root = stack.root();
        StaticSite::new(&mut root, "Site", &config, &asset).unwrap();
        let err = StaticSite::new(&mut root, "Site", &config, &asset).unwrap_err();
        assert!(matches!(err, Error::DuplicateConstructId { .. }));
    }
}

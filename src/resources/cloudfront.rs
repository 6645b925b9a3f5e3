use super::*;

/// managed cache policy "CachingOptimized".
/// https://docs.aws.amazon.com/AmazonCloudFront/latest/DeveloperGuide/using-managed-cache-policies.html#managed-cache-caching-optimized
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

/// error codes CloudFront allows a custom error response for.
pub const CUSTOMIZABLE_ERROR_CODES: &[u16] = &[400, 403, 404, 405, 414, 416, 500, 501, 502, 503, 504];

/// both variants keep viewers on HTTPS. Allowing plain HTTP is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
    #[default]
    RedirectToHttps,
    HttpsOnly,
}

impl std::str::FromStr for ViewerProtocolPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "redirect-to-https" => Ok(ViewerProtocolPolicy::RedirectToHttps),
            "https-only" => Ok(ViewerProtocolPolicy::HttpsOnly),
            x => Err(format!("Unexpected viewer protocol policy '{x}'. Expected 'redirect-to-https' or 'https-only'")),
        }
    }
}

/// maps an error status from the origin to a page and status for the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "ErrorCode")]
    pub http_status: u16,
    #[serde(rename = "ResponseCode")]
    pub response_http_status: u16,
    #[serde(rename = "ResponsePagePath")]
    pub response_page_path: String,
    #[serde(rename = "ErrorCachingMinTTL", skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u32>,
}

impl ErrorResponse {
    /// serve the app entry point for unknown paths so client side routing can take over.
    pub fn spa_fallback(http_status: u16, page: &str) -> Self {
        Self {
            http_status,
            response_http_status: 200,
            response_page_path: page.to_string(),
            ttl_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OriginAccessIdentityConfig {
    pub comment: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnCloudFrontOriginAccessIdentity {
    pub cloud_front_origin_access_identity_config: OriginAccessIdentityConfig,
}
cfn_resource!(CfnCloudFrontOriginAccessIdentity, "AWS::CloudFront::CloudFrontOriginAccessIdentity");

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3OriginConfig {
    pub origin_access_identity: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Origin {
    pub id: String,
    pub domain_name: Value,
    pub s3_origin_config: S3OriginConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultCacheBehavior {
    pub target_origin_id: String,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub cache_policy_id: String,
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub default_root_object: String,
    pub default_cache_behavior: DefaultCacheBehavior,
    pub origins: Vec<Origin>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_error_responses: Vec<ErrorResponse>,
    pub http_version: String,
    #[serde(rename = "IPV6Enabled")]
    pub ipv6_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnDistribution {
    pub distribution_config: DistributionConfig,
}
cfn_resource!(CfnDistribution, "AWS::CloudFront::Distribution");

pub struct DistributionProps<'a> {
    pub origin: &'a Bucket,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub default_root_object: String,
    pub error_responses: Vec<ErrorResponse>,
    pub comment: Option<String>,
}

/// a distribution fronting exactly one private bucket.
///
/// The bucket stays private: the distribution reads it through an origin
/// access identity, which gets its own bucket policy. The identity may list
/// the bucket too, so a missing key is a 404 (which error responses can map)
/// rather than a 403.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub logical_id: String,
    pub origin_access_identity: String,
    pub bucket_policy: String,
}

impl Distribution {
    pub fn new(scope: &mut Scope<'_>, id: &str, props: DistributionProps<'_>) -> Result<Self> {
        for response in props.error_responses.iter() {
            if !CUSTOMIZABLE_ERROR_CODES.contains(&response.http_status) {
                return Err(Error::config("error_responses", format!("CloudFront cannot customize responses for status {}", response.http_status)));
            }
            if !response.response_page_path.starts_with('/') {
                return Err(Error::config("error_responses", format!("response page path '{}' must start with '/'", response.response_page_path)));
            }
        }
        if props.default_root_object.starts_with('/') {
            return Err(Error::config("default_root_object", "must not start with '/'"));
        }

        let mut distribution_scope = scope.child(id)?;
        let origin_id = "origin1";
        let (origin_access_identity, bucket_policy) = {
            let mut origin_scope = distribution_scope.child("Origin1")?;
            let oai = CfnCloudFrontOriginAccessIdentity {
                cloud_front_origin_access_identity_config: OriginAccessIdentityConfig {
                    comment: format!("Identity for {}", origin_scope.path()),
                },
            };
            let oai_id = origin_scope.add_resource("S3Origin", &oai)?;
            let principal = json!({ "CanonicalUser": get_att(&oai_id, "S3CanonicalUserId") });
            let policy = BucketPolicy::new(&mut origin_scope, "BucketPolicy", props.origin, vec![
                PolicyStatement::allow(&["s3:GetObject"], vec![props.origin.arn_for_objects("*")])
                    .with_principal(principal.clone()),
                PolicyStatement::allow(&["s3:ListBucket"], vec![props.origin.arn()])
                    .with_principal(principal),
            ])?;
            (oai_id, policy.logical_id)
        };

        let distribution = CfnDistribution {
            distribution_config: DistributionConfig {
                enabled: true,
                comment: props.comment,
                default_root_object: props.default_root_object,
                default_cache_behavior: DefaultCacheBehavior {
                    target_origin_id: origin_id.to_string(),
                    viewer_protocol_policy: props.viewer_protocol_policy,
                    cache_policy_id: CACHING_OPTIMIZED_POLICY_ID.to_string(),
                    compress: true,
                },
                origins: vec![Origin {
                    id: origin_id.to_string(),
                    domain_name: props.origin.regional_domain_name(),
                    s3_origin_config: S3OriginConfig {
                        origin_access_identity: join("", vec![
                            json!("origin-access-identity/cloudfront/"),
                            get_ref(&origin_access_identity),
                        ]),
                    },
                }],
                custom_error_responses: props.error_responses,
                http_version: "http2".to_string(),
                ipv6_enabled: true,
            },
        };
        let logical_id = distribution_scope.add_resource(DEFAULT_CHILD_ID, &distribution)?;
        Ok(Distribution { logical_id, origin_access_identity, bucket_policy })
    }

    pub fn distribution_id(&self) -> Value {
        get_ref(&self.logical_id)
    }

    pub fn domain_name(&self) -> Value {
        get_att(&self.logical_id, "DomainName")
    }

    /// the distribution's arn. Without an explicit account the
    /// deploying account is used.
    pub fn arn(&self, account_id: Option<&str>) -> Value {
        let account = account_id.unwrap_or("${AWS::AccountId}");
        sub(format!("arn:${{AWS::Partition}}:cloudfront::{account}:distribution/${{{}}}", self.logical_id))
    }
}

use super::*;

/// empties the bucket named in the resource properties when the custom
/// resource is deleted, so the bucket itself can be deleted afterwards.
pub const AUTO_DELETE_OBJECTS_HANDLER: &str = r#"import boto3
import cfnresponse

s3 = boto3.resource('s3')


def handler(event, context):
    status = cfnresponse.SUCCESS
    if event['RequestType'] == 'Delete':
        try:
            bucket = s3.Bucket(event['ResourceProperties']['BucketName'])
            bucket.object_versions.delete()
            bucket.objects.all().delete()
        except s3.meta.client.exceptions.NoSuchBucket:
            pass
        except Exception as err:
            print('failed to empty bucket: %s' % err)
            status = cfnresponse.FAILED
    cfnresponse.send(event, context, status, {})
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlockConfiguration {
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlockConfiguration {
    pub fn block_all() -> Self {
        Self {
            block_public_acls: true,
            block_public_policy: true,
            ignore_public_acls: true,
            restrict_public_buckets: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnershipControlsRule {
    pub object_ownership: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnershipControls {
    pub rules: Vec<OwnershipControlsRule>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnBucket {
    pub public_access_block_configuration: PublicAccessBlockConfiguration,
    pub ownership_controls: OwnershipControls,
}
cfn_resource!(CfnBucket, "AWS::S3::Bucket");

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnBucketPolicy {
    pub bucket: Value,
    pub policy_document: PolicyDocument,
}
cfn_resource!(CfnBucketPolicy, "AWS::S3::BucketPolicy");

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoDeleteObjectsResource {
    pub service_token: Value,
    pub bucket_name: Value,
}
cfn_resource!(AutoDeleteObjectsResource, "Custom::S3AutoDeleteObjects");

#[derive(Debug, Clone, Copy, Default)]
pub struct BucketProps {
    pub removal_policy: RemovalPolicy,
    /// only valid together with `RemovalPolicy::Destroy`. Without it, deleting
    /// a stack whose bucket still holds objects fails.
    pub auto_delete_objects: bool,
}

/// a private bucket. Public access is always fully blocked: content is
/// meant to be served through a distribution, never from the bucket itself.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub logical_id: String,
    pub auto_delete: Option<String>,
}

impl Bucket {
    pub fn new(scope: &mut Scope<'_>, id: &str, props: &BucketProps) -> Result<Self> {
        if props.auto_delete_objects && props.removal_policy != RemovalPolicy::Destroy {
            return Err(Error::config(
                "auto_delete_objects",
                "cannot auto delete objects of a bucket that is retained. Set removal_policy to 'destroy'",
            ));
        }
        let bucket = CfnBucket {
            public_access_block_configuration: PublicAccessBlockConfiguration::block_all(),
            ownership_controls: OwnershipControls {
                rules: vec![OwnershipControlsRule { object_ownership: "BucketOwnerEnforced".into() }],
            },
        };
        let mut bucket_scope = scope.child(id)?;
        let logical_id = bucket_scope.add_resource_with(
            DEFAULT_CHILD_ID,
            &bucket,
            ResourceOptions::removal(props.removal_policy),
        )?;
        let auto_delete = if props.auto_delete_objects {
            Some(add_auto_delete_objects(&mut bucket_scope, &logical_id)?)
        } else {
            None
        };
        Ok(Bucket { logical_id, auto_delete })
    }

    pub fn bucket_name(&self) -> Value {
        get_ref(&self.logical_id)
    }

    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    pub fn regional_domain_name(&self) -> Value {
        get_att(&self.logical_id, "RegionalDomainName")
    }

    /// arn matching keys under this bucket, eg: `*` for every object.
    pub fn arn_for_objects(&self, key_pattern: &str) -> Value {
        join("", vec![self.arn(), json!(format!("/{key_pattern}"))])
    }
}

/// a lambda backed custom resource that empties the bucket on delete.
/// It references the bucket, so CloudFormation deletes it (emptying the
/// bucket) before it deletes the bucket.
fn add_auto_delete_objects(bucket_scope: &mut Scope<'_>, bucket_logical_id: &str) -> Result<String> {
    let mut scope = bucket_scope.child("AutoDeleteObjects")?;
    let bucket_arn = get_att(bucket_logical_id, "Arn");
    let objects_arn = join("", vec![bucket_arn.clone(), json!("/*")]);
    let mut role_props = RoleProps::assumed_by("lambda.amazonaws.com");
    role_props.description = Some(format!("empties {} on stack deletion", bucket_logical_id));
    role_props.managed_policy_arns.push(managed_policy_arn("service-role/AWSLambdaBasicExecutionRole"));
    role_props.inline_policies.push(InlinePolicy {
        policy_name: "AutoDeleteObjects".into(),
        policy_document: PolicyDocument::new(vec![
            PolicyStatement::allow(
                &["s3:GetBucket*", "s3:ListBucket", "s3:ListBucketVersions"],
                vec![bucket_arn],
            ),
            PolicyStatement::allow(
                &["s3:DeleteObject", "s3:DeleteObjectVersion"],
                vec![objects_arn],
            ),
        ]),
    });
    let role = Role::new(&mut scope, "Role", role_props)?;
    let mut function_props = FunctionProps::inline(AUTO_DELETE_OBJECTS_HANDLER, role.arn());
    function_props.timeout = 900;
    function_props.description = Some(format!("empties {} on stack deletion", bucket_logical_id));
    let function = Function::new(&mut scope, "Handler", function_props)?;
    let custom = AutoDeleteObjectsResource {
        service_token: function.arn(),
        bucket_name: get_ref(bucket_logical_id),
    };
    scope.add_resource_with("CustomResource", &custom, ResourceOptions::removal(RemovalPolicy::Destroy))
}

/// a bucket policy. Bucket policies replace each other, so a bucket
/// should only ever get one.
#[derive(Debug, Clone)]
pub struct BucketPolicy {
    pub logical_id: String,
    pub document: PolicyDocument,
}

impl BucketPolicy {
    pub fn new(scope: &mut Scope<'_>, id: &str, bucket: &Bucket, statements: Vec<PolicyStatement>) -> Result<Self> {
        let document = PolicyDocument::new(statements);
        let policy = CfnBucketPolicy {
            bucket: bucket.bucket_name(),
            policy_document: document.clone(),
        };
        let logical_id = scope.add_resource(id, &policy)?;
        Ok(BucketPolicy { logical_id, document })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bucket_in(stack: &mut Stack, props: BucketProps) -> Result<Bucket> {
        let mut root = stack.root();
        Bucket::new(&mut root, "FrontendBucket", &props)
    }

    #[test]
    fn bucket_blocks_all_public_access() {
        let mut stack = Stack::new("test").unwrap();
        let bucket = bucket_in(&mut stack, BucketProps { removal_policy: RemovalPolicy::Retain, auto_delete_objects: false }).unwrap();
        let saved = &stack.template().resources[&bucket.logical_id];
        assert_eq!(saved.ty, "AWS::S3::Bucket");
        assert_eq!(saved.properties["PublicAccessBlockConfiguration"], json!({
            "BlockPublicAcls": true,
            "BlockPublicPolicy": true,
            "IgnorePublicAcls": true,
            "RestrictPublicBuckets": true,
        }));
        assert_eq!(saved.properties["OwnershipControls"]["Rules"][0]["ObjectOwnership"], "BucketOwnerEnforced");
        assert_eq!(saved.deletion_policy.as_deref(), Some("Retain"));
        assert!(bucket.auto_delete.is_none());
        assert_eq!(stack.template().resources.len(), 1);
    }

    #[test]
    fn auto_delete_adds_cleanup_custom_resource() {
        let mut stack = Stack::new("test").unwrap();
        let bucket = bucket_in(&mut stack, BucketProps { removal_policy: RemovalPolicy::Destroy, auto_delete_objects: true }).unwrap();
        let template = stack.template();
        assert_eq!(template.resources[&bucket.logical_id].deletion_policy.as_deref(), Some("Delete"));

        let cleanup_id = bucket.auto_delete.as_ref().unwrap();
        let cleanup = &template.resources[cleanup_id];
        assert_eq!(cleanup.ty, "Custom::S3AutoDeleteObjects");
        assert_eq!(cleanup.properties["BucketName"], get_ref(&bucket.logical_id));
        // the cleanup waits on the bucket, so it is deleted first on teardown
        assert!(template.dependencies_of(cleanup_id).unwrap().contains(&bucket.logical_id));
        let order = template.creation_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos(&bucket.logical_id) < pos(cleanup_id));

        let role_id = stack.logical_id("FrontendBucket/AutoDeleteObjects/Role/Resource").unwrap();
        let role = &template.resources[role_id];
        let statements = &role.properties["Policies"][0]["PolicyDocument"]["Statement"];
        assert_eq!(statements[1]["Action"], json!(["s3:DeleteObject", "s3:DeleteObjectVersion"]));
    }

    #[test]
    fn auto_delete_requires_destroy() {
        let mut stack = Stack::new("test").unwrap();
        let result = bucket_in(&mut stack, BucketProps { removal_policy: RemovalPolicy::Retain, auto_delete_objects: true });
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn bucket_policy_targets_bucket() {
        let mut stack = Stack::new("test").unwrap();
        let (bucket, policy) = {
            let mut root = stack.root();
            let bucket = Bucket::new(&mut root, "B", &BucketProps::default()).unwrap();
            let statement = PolicyStatement::allow(&["s3:GetObject"], vec![bucket.arn_for_objects("*")]);
            let policy = BucketPolicy::new(&mut root, "Policy", &bucket, vec![statement]).unwrap();
            (bucket, policy)
        };
        let saved = &stack.template().resources[&policy.logical_id];
        assert_eq!(saved.properties["Bucket"], get_ref(&bucket.logical_id));
        assert_eq!(
            saved.properties["PolicyDocument"]["Statement"][0]["Resource"][0],
            json!({ "Fn::Join": ["", [get_att(&bucket.logical_id, "Arn"), "/*"]] })
        );
    }
}

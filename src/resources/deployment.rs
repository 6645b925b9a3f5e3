use super::*;

/// copies a staged zip into the destination bucket, then invalidates the
/// distribution and waits for the invalidation to complete.
/// Deletes are a no-op: emptying the bucket belongs to the bucket itself.
pub const BUCKET_DEPLOYMENT_HANDLER: &str = r#"import io
import mimetypes
import time
import zipfile

import boto3
import cfnresponse

s3 = boto3.client('s3')
cloudfront = boto3.client('cloudfront')


def handler(event, context):
    status = cfnresponse.SUCCESS
    physical_id = event.get('PhysicalResourceId', event['LogicalResourceId'])
    try:
        if event['RequestType'] in ('Create', 'Update'):
            props = event['ResourceProperties']
            keys = deploy(props)
            if str(props.get('Prune', 'true')).lower() == 'true':
                prune(props['DestinationBucketName'], keys)
            invalidate(props['DistributionId'], props['DistributionPaths'])
    except Exception as err:
        print('deployment failed: %s' % err)
        status = cfnresponse.FAILED
    cfnresponse.send(event, context, status, {}, physical_id)


def deploy(props):
    source = s3.get_object(Bucket=props['SourceBucketName'], Key=props['SourceObjectKey'])
    keys = set()
    with zipfile.ZipFile(io.BytesIO(source['Body'].read())) as archive:
        for name in archive.namelist():
            if name.endswith('/'):
                continue
            content_type = mimetypes.guess_type(name)[0] or 'application/octet-stream'
            s3.put_object(Bucket=props['DestinationBucketName'], Key=name, Body=archive.read(name), ContentType=content_type)
            keys.add(name)
    return keys


def prune(bucket, keep):
    for page in s3.get_paginator('list_objects_v2').paginate(Bucket=bucket):
        stale = [{'Key': o['Key']} for o in page.get('Contents', []) if o['Key'] not in keep]
        if stale:
            s3.delete_objects(Bucket=bucket, Delete={'Objects': stale})


def invalidate(distribution_id, paths):
    created = cloudfront.create_invalidation(
        DistributionId=distribution_id,
        InvalidationBatch={'Paths': {'Quantity': len(paths), 'Items': paths}, 'CallerReference': str(time.time())},
    )
    invalidation_id = created['Invalidation']['Id']
    while cloudfront.get_invalidation(DistributionId=distribution_id, Id=invalidation_id)['Invalidation']['Status'] != 'Completed':
        time.sleep(10)
"#;

/// the maximum a lambda function can run for. Waiting on an
/// invalidation can take several minutes.
pub const DEPLOYMENT_TIMEOUT_SECONDS: u32 = 900;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketDeploymentResource {
    pub service_token: Value,
    pub source_bucket_name: Value,
    pub source_object_key: Value,
    pub destination_bucket_name: Value,
    pub distribution_id: Value,
    pub distribution_paths: Vec<String>,
    pub prune: bool,
    /// changes on every deploy, so the handler runs (and invalidates)
    /// even when the staged asset is unchanged.
    pub deployment_nonce: Value,
}
cfn_resource!(BucketDeploymentResource, "Custom::StaticSiteDeployment");

/// where the zipped assets are staged, as template values.
#[derive(Debug, Clone)]
pub struct AssetSource {
    pub bucket_name: Value,
    pub object_key: Value,
    /// the same location as a `Fn::Sub` string, for building arns.
    pub sub_location: String,
}

pub struct BucketDeploymentProps<'a> {
    pub source: AssetSource,
    pub destination_bucket: &'a Bucket,
    pub distribution: &'a Distribution,
    pub distribution_paths: Vec<String>,
    /// the execution role. It must already be allowed to invalidate
    /// `distribution`; access to the buckets is granted here.
    pub role: &'a Role,
    pub memory_limit: u32,
    pub log_retention_days: u32,
    pub prune: bool,
    pub deployment_nonce: Value,
}

#[derive(Debug, Clone)]
pub struct BucketDeployment {
    pub logical_id: String,
    pub function: Function,
    pub grants: Policy,
}

impl BucketDeployment {
    pub fn new(scope: &mut Scope<'_>, id: &str, props: BucketDeploymentProps<'_>) -> Result<Self> {
        if props.distribution_paths.is_empty() {
            return Err(Error::config("distribution_paths", "must invalidate at least one path"));
        }
        if let Some(bad) = props.distribution_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(Error::config("distribution_paths", format!("invalidation path '{bad}' must start with '/'")));
        }

        let mut deployment_scope = scope.child(id)?;
        let mut function_props = FunctionProps::inline(BUCKET_DEPLOYMENT_HANDLER, props.role.arn());
        function_props.memory_size = props.memory_limit;
        function_props.timeout = DEPLOYMENT_TIMEOUT_SECONDS;
        function_props.log_retention_days = Some(props.log_retention_days);
        function_props.description = Some("uploads site assets and invalidates the distribution".into());
        let function = Function::new(&mut deployment_scope, "Handler", function_props)?;

        let destination = props.destination_bucket;
        let grants = Policy::new(&mut deployment_scope, "Grants", &[props.role], vec![
            PolicyStatement::allow(
                &["s3:GetObject*", "s3:GetBucket*", "s3:List*"],
                vec![sub(format!("arn:${{AWS::Partition}}:s3:::{}", props.source.sub_location))],
            ),
            PolicyStatement::allow(
                &["s3:GetObject*", "s3:GetBucket*", "s3:List*", "s3:DeleteObject*", "s3:PutObject", "s3:Abort*"],
                vec![destination.arn(), destination.arn_for_objects("*")],
            ),
            PolicyStatement::allow(
                &["logs:CreateLogStream", "logs:PutLogEvents"],
                vec![function.log_group_arn()],
            ),
        ])?;

        let resource = BucketDeploymentResource {
            service_token: function.arn(),
            source_bucket_name: props.source.bucket_name,
            source_object_key: props.source.object_key,
            destination_bucket_name: destination.bucket_name(),
            distribution_id: props.distribution.distribution_id(),
            distribution_paths: props.distribution_paths,
            prune: props.prune,
            deployment_nonce: props.deployment_nonce,
        };
        // the handler needs its grants before it runs, and its log group
        // must exist before lambda would create one without retention.
        let mut depends_on = vec![grants.logical_id.clone()];
        depends_on.extend(function.log_group.iter().cloned());
        let logical_id = deployment_scope.add_resource_with(
            "CustomResource",
            &resource,
            ResourceOptions::depends_on(depends_on),
        )?;
        Ok(BucketDeployment { logical_id, function, grants })
    }
}

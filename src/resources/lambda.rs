use super::*;

/// retention periods CloudWatch Logs accepts for a log group.
pub const VALID_LOG_RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922, 3288, 3653,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Runtime {
    #[serde(rename = "python3.12")]
    Python312,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Code {
    pub zip_file: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnFunction {
    pub code: Code,
    pub handler: String,
    pub role: Value,
    pub runtime: Runtime,
    pub memory_size: u32,
    pub timeout: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
cfn_resource!(CfnFunction, "AWS::Lambda::Function");

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnLogGroup {
    pub log_group_name: Value,
    pub retention_in_days: u32,
}
cfn_resource!(CfnLogGroup, "AWS::Logs::LogGroup");

pub struct FunctionProps {
    /// inline source. Inline functions are written to index.<ext>,
    /// so handlers look like `index.handler`.
    pub code: String,
    pub handler: String,
    pub runtime: Runtime,
    pub role: Value,
    pub memory_size: u32,
    pub timeout: u32,
    pub description: Option<String>,
    /// if set, a log group with this retention is created for the function
    /// instead of letting lambda create one that never expires.
    pub log_retention_days: Option<u32>,
}

impl FunctionProps {
    pub fn inline(code: &str, role: Value) -> Self {
        Self {
            code: code.to_string(),
            handler: "index.handler".to_string(),
            runtime: Runtime::Python312,
            role,
            memory_size: 128,
            timeout: 30,
            description: None,
            log_retention_days: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub logical_id: String,
    pub log_group: Option<String>,
}

impl Function {
    pub fn new(scope: &mut Scope<'_>, id: &str, props: FunctionProps) -> Result<Self> {
        if !(128..=10240).contains(&props.memory_size) {
            return Err(Error::config("memory_limit", format!("{} MB is outside of 128..=10240", props.memory_size)));
        }
        if let Some(days) = props.log_retention_days {
            if !VALID_LOG_RETENTION_DAYS.contains(&days) {
                return Err(Error::config("log_retention_days", format!("{days} is not a retention period CloudWatch supports")));
            }
        }
        let function = CfnFunction {
            code: Code { zip_file: props.code },
            handler: props.handler,
            role: props.role,
            runtime: props.runtime,
            memory_size: props.memory_size,
            timeout: props.timeout,
            description: props.description,
        };
        let mut function_scope = scope.child(id)?;
        let logical_id = function_scope.add_resource(DEFAULT_CHILD_ID, &function)?;
        let log_group = match props.log_retention_days {
            Some(retention_in_days) => {
                let group = CfnLogGroup {
                    log_group_name: sub(format!("/aws/lambda/${{{logical_id}}}")),
                    retention_in_days,
                };
                let group_id = function_scope.add_resource_with(
                    "LogGroup",
                    &group,
                    ResourceOptions::removal(RemovalPolicy::Destroy),
                )?;
                Some(group_id)
            }
            None => None,
        };
        Ok(Function { logical_id, log_group })
    }

    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    /// arn of the function's log group, used to grant write access to it.
    pub fn log_group_arn(&self) -> Value {
        sub(format!(
            "arn:${{AWS::Partition}}:logs:${{AWS::Region}}:${{AWS::AccountId}}:log-group:/aws/lambda/${{{}}}:*",
            self.logical_id
        ))
    }
}

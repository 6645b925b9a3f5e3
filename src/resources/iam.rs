use super::*;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl PolicyStatement {
    pub fn allow<A: AsRef<str>>(actions: &[A], resources: Vec<Value>) -> Self {
        PolicyStatement {
            effect: Effect::Allow,
            principal: None,
            action: actions.iter().map(|a| a.as_ref().to_string()).collect(),
            resource: resources,
            condition: None,
        }
    }

    pub fn with_principal(mut self, principal: Value) -> Self {
        self.principal = Some(principal);
        self
    }

    /// true if any resource is the bare `*` wildcard.
    pub fn has_wildcard_resource(&self) -> bool {
        self.resource.iter().any(|r| r.as_str() == Some("*"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<PolicyStatement>) -> Self {
        Self { version: POLICY_VERSION.to_string(), statement }
    }

    pub fn actions(&self) -> Vec<&str> {
        self.statement.iter()
            .flat_map(|s| s.action.iter().map(|a| a.as_str()))
            .collect()
    }
}

pub fn service_principal(service: &str) -> Value {
    json!({ "Service": service })
}

/// trust policy letting `service` assume a role.
pub fn assume_role_policy_doc(service: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        PolicyStatement::allow(&["sts:AssumeRole"], vec![]).with_principal(service_principal(service)),
    ])
}

pub fn managed_policy_arn(name: &str) -> Value {
    sub(format!("arn:${{AWS::Partition}}:iam::aws:policy/{name}"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InlinePolicy {
    pub policy_name: String,
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnRole {
    pub assume_role_policy_document: PolicyDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<InlinePolicy>,
}
cfn_resource!(CfnRole, "AWS::IAM::Role");

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnPolicy {
    pub policy_name: String,
    pub policy_document: PolicyDocument,
    pub roles: Vec<Value>,
}
cfn_resource!(CfnPolicy, "AWS::IAM::Policy");

pub struct RoleProps {
    /// the service principal allowed to assume this role, eg: lambda.amazonaws.com
    pub assumed_by: String,
    pub description: Option<String>,
    pub managed_policy_arns: Vec<Value>,
    pub inline_policies: Vec<InlinePolicy>,
}

impl RoleProps {
    pub fn assumed_by(service: &str) -> Self {
        Self {
            assumed_by: service.to_string(),
            description: None,
            managed_policy_arns: vec![],
            inline_policies: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Role {
    pub logical_id: String,
    pub inline_policies: Vec<InlinePolicy>,
}

impl Role {
    pub fn new(scope: &mut Scope<'_>, id: &str, props: RoleProps) -> Result<Self> {
        let role = CfnRole {
            assume_role_policy_document: assume_role_policy_doc(&props.assumed_by),
            description: props.description,
            managed_policy_arns: props.managed_policy_arns,
            policies: props.inline_policies.clone(),
        };
        let mut role_scope = scope.child(id)?;
        let logical_id = role_scope.add_resource(DEFAULT_CHILD_ID, &role)?;
        Ok(Role { logical_id, inline_policies: props.inline_policies })
    }

    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    pub fn role_name(&self) -> Value {
        get_ref(&self.logical_id)
    }
}

/// a standalone policy attached to existing roles. Used to grant a role
/// extra permissions without touching the role's own inline policies.
#[derive(Debug, Clone)]
pub struct Policy {
    pub logical_id: String,
    pub document: PolicyDocument,
}

impl Policy {
    pub fn new(scope: &mut Scope<'_>, id: &str, roles: &[&Role], statements: Vec<PolicyStatement>) -> Result<Self> {
        let policy_name: String = id.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        let document = PolicyDocument::new(statements);
        let policy = CfnPolicy {
            policy_name,
            policy_document: document.clone(),
            roles: roles.iter().map(|r| r.role_name()).collect(),
        };
        let mut policy_scope = scope.child(id)?;
        let logical_id = policy_scope.add_resource(DEFAULT_CHILD_ID, &policy)?;
        Ok(Policy { logical_id, document })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn statements_serialize_as_iam_json() {
        let statement = PolicyStatement::allow(&["s3:GetObject"], vec![json!("arn:aws:s3:::b/*")]);
        let value = serde_json::to_value(&statement).unwrap();
        assert_eq!(value, json!({
            "Effect": "Allow",
            "Action": ["s3:GetObject"],
            "Resource": ["arn:aws:s3:::b/*"],
        }));
        assert!(!statement.has_wildcard_resource());
        assert!(PolicyStatement::allow(&["s3:*"], vec![json!("*")]).has_wildcard_resource());
    }

    #[test]
    fn role_gets_trust_policy_and_inline_policies() {
        let mut stack = Stack::new("test").unwrap();
        let role = {
            let mut root = stack.root();
            let mut props = RoleProps::assumed_by("lambda.amazonaws.com");
            props.inline_policies.push(InlinePolicy {
                policy_name: "Inline".into(),
                policy_document: PolicyDocument::new(vec![PolicyStatement::allow(&["sqs:SendMessage"], vec![json!("arn:aws:sqs:::q")])]),
            });
            Role::new(&mut root, "MyRole", props).unwrap()
        };
        let saved = &stack.template().resources[&role.logical_id];
        assert_eq!(saved.ty, "AWS::IAM::Role");
        let trust = &saved.properties["AssumeRolePolicyDocument"];
        assert_eq!(trust["Version"], POLICY_VERSION);
        assert_eq!(trust["Statement"][0]["Principal"]["Service"], "lambda.amazonaws.com");
        assert_eq!(trust["Statement"][0]["Action"], json!(["sts:AssumeRole"]));
        assert!(trust["Statement"][0].get("Resource").is_none());
        assert_eq!(saved.properties["Policies"][0]["PolicyName"], "Inline");
        assert!(saved.properties.get("ManagedPolicyArns").is_none());
    }

    #[test]
    fn standalone_policy_targets_roles() {
        let mut stack = Stack::new("test").unwrap();
        let (role, policy) = {
            let mut root = stack.root();
            let role = Role::new(&mut root, "MyRole", RoleProps::assumed_by("lambda.amazonaws.com")).unwrap();
            let policy = Policy::new(&mut root, "Grants", &[&role], vec![
                PolicyStatement::allow(&["s3:GetObject"], vec![json!("arn:aws:s3:::b/*")]),
            ]).unwrap();
            (role, policy)
        };
        let saved = &stack.template().resources[&policy.logical_id];
        assert_eq!(saved.ty, "AWS::IAM::Policy");
        assert_eq!(saved.properties["PolicyName"], "Grants");
        assert_eq!(saved.properties["Roles"], json!([get_ref(&role.logical_id)]));
    }
}

//! The construction context every construct is declared into.
//!
//! A [`Stack`] owns the template being built along with the deploy script
//! that will ship it. Constructs never touch global state: they receive a
//! [`Scope`], which is a position in the construct tree, and register their
//! resources through it. The path of a resource in that tree determines its
//! logical id, so the same tree always synthesizes to the same template.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::script::DeployScript;
use crate::template::{get_ref, CfnResource, Parameter, RemovalPolicy, ResourceOutput, SavedResource, Template};

/// construct ids with this name are the "main" resource of their parent
/// and are left out of the human readable part of logical ids.
pub const DEFAULT_CHILD_ID: &str = "Resource";

const MAX_LOGICAL_ID_LEN: usize = 255;

pub fn validate_stack_name(stack_name: &str) -> Result<String> {
    // A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
    // It must start with an alphabetical character and can't be longer than 128 characters.
    let err = || Error::InvalidStackName { name: stack_name.to_string() };
    if stack_name.is_empty() || stack_name.len() > 128 {
        return Err(err());
    }
    for (i, c) in stack_name.chars().enumerate() {
        if i == 0 && !c.is_ascii_alphabetic() {
            return Err(err());
        }
        if !c.is_ascii_alphanumeric() && c != '-' {
            return Err(err());
        }
    }
    Ok(stack_name.to_string())
}

/// derives a logical id from a construct path: the alphanumeric characters of
/// every path component, followed by 8 hex digits of the full path's checksum.
pub fn logical_id_for(path: &[String]) -> String {
    let mut human = String::new();
    for component in path.iter() {
        if component == DEFAULT_CHILD_ID {
            continue;
        }
        human.extend(component.chars().filter(|c| c.is_ascii_alphanumeric()));
    }
    human.truncate(MAX_LOGICAL_ID_LEN - 8);
    let checksum = adler::adler32_slice(path.join("/").as_bytes());
    format!("{human}{checksum:08X}")
}

#[derive(Debug, Default, Clone)]
pub struct ResourceOptions {
    pub depends_on: Vec<String>,
    pub removal_policy: Option<RemovalPolicy>,
}

impl ResourceOptions {
    pub fn removal(policy: RemovalPolicy) -> Self {
        Self { removal_policy: Some(policy), ..Default::default() }
    }

    pub fn depends_on<I: IntoIterator<Item = String>>(deps: I) -> Self {
        Self { depends_on: deps.into_iter().collect(), ..Default::default() }
    }
}

#[derive(Debug)]
pub struct Stack {
    name: String,
    template: Template,
    constructs: BTreeSet<String>,
    /// construct path -> logical id
    logical_ids: BTreeMap<String, String>,
    script: DeployScript,
}

impl Stack {
    pub fn new(name: &str) -> Result<Self> {
        let name = validate_stack_name(name)?;
        Ok(Self {
            name,
            template: Template::default(),
            constructs: Default::default(),
            logical_ids: Default::default(),
            script: DeployScript::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&mut self) -> Scope<'_> {
        Scope { stack: self, path: vec![] }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn set_description(&mut self, description: &str) {
        self.template.description = Some(description.to_string());
    }

    pub fn script(&self) -> &DeployScript {
        &self.script
    }

    pub fn script_mut(&mut self) -> &mut DeployScript {
        &mut self.script
    }

    pub fn logical_id(&self, construct_path: &str) -> Option<&str> {
        self.logical_ids.get(construct_path).map(|s| s.as_str())
    }

    pub fn construct_path(&self, logical_id: &str) -> Option<&str> {
        self.logical_ids.iter()
            .find(|(_, id)| id.as_str() == logical_id)
            .map(|(path, _)| path.as_str())
    }

    /// declares a string parameter and returns a `Ref` to it.
    pub fn add_parameter(&mut self, name: &str, description: &str) -> Result<Value> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidConstructId { id: name.to_string() });
        }
        if self.template.parameters.contains_key(name) || self.template.resources.contains_key(name) {
            return Err(Error::DuplicateConstructId { parent: self.name.clone(), id: name.to_string() });
        }
        self.template.parameters.insert(name.to_string(), Parameter {
            ty: "String".to_string(),
            description: description.to_string(),
        });
        Ok(get_ref(name))
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidConstructId { id: name.to_string() });
        }
        if self.template.outputs.contains_key(name) {
            return Err(Error::DuplicateConstructId { parent: self.name.clone(), id: name.to_string() });
        }
        self.template.outputs.insert(name.to_string(), ResourceOutput {
            description: description.to_string(),
            value,
        });
        Ok(())
    }
}

/// a position in the construct tree of a [`Stack`].
pub struct Scope<'a> {
    stack: &'a mut Stack,
    path: Vec<String>,
}

impl<'a> Scope<'a> {
    pub fn path(&self) -> String {
        self.path.join("/")
    }

    pub fn stack(&mut self) -> &mut Stack {
        &mut *self.stack
    }

    fn register(&mut self, id: &str) -> Result<Vec<String>> {
        if id.is_empty() || id.contains('/') {
            return Err(Error::InvalidConstructId { id: id.to_string() });
        }
        let mut path = self.path.clone();
        path.push(id.to_string());
        let key = path.join("/");
        if !self.stack.constructs.insert(key) {
            return Err(Error::DuplicateConstructId { parent: self.path(), id: id.to_string() });
        }
        Ok(path)
    }

    /// the template wide name of `id` under this scope: the alphanumeric
    /// characters of every path component followed by `id`.
    fn qualified_name(&self, id: &str) -> String {
        let mut name: String = self.path.iter()
            .filter(|c| c.as_str() != DEFAULT_CHILD_ID)
            .flat_map(|c| c.chars().filter(|c| c.is_ascii_alphanumeric()))
            .collect();
        name.extend(id.chars().filter(|c| c.is_ascii_alphanumeric()));
        name
    }

    /// declares a string parameter owned by this scope and returns its name.
    pub fn add_parameter(&mut self, id: &str, description: &str) -> Result<String> {
        self.register(id)?;
        let name = self.qualified_name(id);
        self.stack.add_parameter(&name, description)?;
        Ok(name)
    }

    /// declares an output owned by this scope and returns its name.
    pub fn add_output(&mut self, id: &str, description: &str, value: Value) -> Result<String> {
        self.register(id)?;
        let name = self.qualified_name(id);
        self.stack.add_output(&name, description, value)?;
        Ok(name)
    }

    pub fn child(&mut self, id: &str) -> Result<Scope<'_>> {
        let path = self.register(id)?;
        Ok(Scope { stack: &mut *self.stack, path })
    }

    pub fn add_resource<R: CfnResource>(&mut self, id: &str, resource: &R) -> Result<String> {
        self.add_resource_with(id, resource, ResourceOptions::default())
    }

    pub fn add_resource_with<R: CfnResource>(&mut self, id: &str, resource: &R, options: ResourceOptions) -> Result<String> {
        let path = self.register(id)?;
        let logical_id = logical_id_for(&path);
        let construct_path = path.join("/");
        if self.stack.template.resources.contains_key(&logical_id)
            || self.stack.template.parameters.contains_key(&logical_id)
        {
            return Err(Error::DuplicateLogicalId { path: construct_path, logical_id });
        }
        let policy = options.removal_policy.map(|p| p.as_policy_str().to_string());
        let saved = SavedResource {
            ty: resource.type_string().to_string(),
            properties: resource.properties()?,
            depends_on: options.depends_on,
            deletion_policy: policy.clone(),
            update_replace_policy: policy,
        };
        tracing::debug!(
            target: crate::TRACING_TARGET_SYNTH,
            path = %construct_path,
            logical_id = %logical_id,
            ty = %saved.ty,
            "registered resource"
        );
        self.stack.template.resources.insert(logical_id.clone(), saved);
        self.stack.logical_ids.insert(construct_path, logical_id.clone());
        Ok(logical_id)
    }
}

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// anything that can be placed in the `Resources` section of a template.
pub trait CfnResource {
    fn type_string(&self) -> &'static str;
    fn properties(&self) -> serde_json::Result<Value>;
}

/// implements `CfnResource` for a serializable properties struct.
macro_rules! cfn_resource {
    ($ty:ty, $type_string:literal) => {
        impl $crate::template::CfnResource for $ty {
            fn type_string(&self) -> &'static str {
                $type_string
            }
            fn properties(&self) -> serde_json::Result<serde_json::Value> {
                serde_json::to_value(self)
            }
        }
    };
}
pub(crate) use cfn_resource;

/// what happens to a resource when it is removed from the stack,
/// or when the stack is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    #[default]
    Destroy,
    Retain,
}

impl RemovalPolicy {
    pub fn as_policy_str(&self) -> &'static str {
        match self {
            RemovalPolicy::Destroy => "Delete",
            RemovalPolicy::Retain => "Retain",
        }
    }
}

impl std::str::FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "destroy" | "delete" => Ok(RemovalPolicy::Destroy),
            "retain" => Ok(RemovalPolicy::Retain),
            x => Err(format!("Unexpected removal policy '{x}'. Expected 'destroy' or 'retain'")),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SavedResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Description")]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, SavedResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ResourceOutput>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            version: "2010-09-09".to_string(),
            description: None,
            parameters: Default::default(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

pub fn get_ref(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn sub<S: Into<String>>(s: S) -> Value {
    json!({ "Fn::Sub": s.into() })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// every logical id referenced by intrinsic functions inside `value`.
/// pseudo parameters (`AWS::Region`, ...) are included, callers filter them.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_references(value, &mut out);
    out
}

fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    out.insert(target.clone());
                    return;
                }
                match map.get("Fn::GetAtt") {
                    Some(Value::Array(parts)) => {
                        if let Some(Value::String(target)) = parts.first() {
                            out.insert(target.clone());
                        }
                        return;
                    }
                    Some(Value::String(dotted)) => {
                        let target = dotted.split_once('.').map(|(t, _)| t).unwrap_or(dotted);
                        out.insert(target.to_string());
                        return;
                    }
                    _ => {}
                }
                match map.get("Fn::Sub") {
                    Some(Value::String(s)) => {
                        sub_references(s, &BTreeSet::new(), out);
                        return;
                    }
                    Some(Value::Array(parts)) => {
                        // [ "string", { "Var": value } ]
                        let mut local_vars = BTreeSet::new();
                        if let Some(Value::Object(vars)) = parts.get(1) {
                            for (name, var_value) in vars {
                                local_vars.insert(name.clone());
                                collect_references(var_value, out);
                            }
                        }
                        if let Some(Value::String(s)) = parts.first() {
                            sub_references(s, &local_vars, out);
                        }
                        return;
                    }
                    _ => {}
                }
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

fn sub_references(s: &str, local_vars: &BTreeSet<String>, out: &mut BTreeSet<String>) {
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        rest = &rest[start + 2..];
        // ${!Literal} is an escaped literal, not a reference
        if rest.starts_with('!') {
            continue;
        }
        let end = match rest.find('}') {
            Some(e) => e,
            None => break,
        };
        let inner = &rest[..end];
        let target = inner.split_once('.').map(|(t, _)| t).unwrap_or(inner);
        if !target.is_empty() && !local_vars.contains(target) {
            out.insert(target.to_string());
        }
        rest = &rest[end + 1..];
    }
}

fn is_pseudo_parameter(name: &str) -> bool {
    name.starts_with("AWS::")
}

impl Template {
    /// the resources that `logical_id` must wait on: every resource it references
    /// plus its explicit DependsOn entries. Errors on references to undefined ids.
    pub fn dependencies_of(&self, logical_id: &str) -> Result<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        let resource = match self.resources.get(logical_id) {
            Some(r) => r,
            None => return Ok(out),
        };
        let mut targets = references(&resource.properties);
        targets.extend(resource.depends_on.iter().cloned());
        for target in targets {
            if is_pseudo_parameter(&target) || self.parameters.contains_key(&target) {
                continue;
            }
            if !self.resources.contains_key(&target) {
                return Err(Error::UnresolvedReference { from: logical_id.to_string(), to: target });
            }
            out.insert(target);
        }
        Ok(out)
    }

    /// a creation order consistent with every declared dependency.
    /// ties are broken by logical id so the order is deterministic.
    pub fn creation_order(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for logical_id in self.resources.keys() {
            remaining.insert(logical_id.clone(), self.dependencies_of(logical_id)?);
        }
        for (name, output) in self.outputs.iter() {
            for target in references(&output.value) {
                if is_pseudo_parameter(&target) || self.parameters.contains_key(&target) {
                    continue;
                }
                if !self.resources.contains_key(&target) {
                    return Err(Error::UnresolvedReference { from: name.clone(), to: target });
                }
            }
        }

        let mut order = Vec::with_capacity(remaining.len());
        loop {
            let ready = remaining.iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(id, _)| id.clone());
            let ready = match ready {
                Some(r) => r,
                None => break,
            };
            remaining.remove(&ready);
            for deps in remaining.values_mut() {
                deps.remove(&ready);
            }
            order.push(ready);
        }

        if remaining.is_empty() {
            return Ok(order);
        }
        Err(Error::DependencyCycle(find_cycle(&remaining)))
    }
}

/// every node left over after a topological sort still waits on another
/// left over node, so following first dependencies must revisit a node.
fn find_cycle(remaining: &BTreeMap<String, BTreeSet<String>>) -> Vec<String> {
    let mut path: Vec<String> = vec![];
    let mut current = match remaining.keys().next() {
        Some(k) => k.clone(),
        None => return path,
    };
    loop {
        if let Some(pos) = path.iter().position(|p| *p == current) {
            let mut cycle = path.split_off(pos);
            cycle.push(current);
            return cycle;
        }
        path.push(current.clone());
        let next = remaining.get(&current)
            .and_then(|deps| deps.iter().find(|d| remaining.contains_key(*d)))
            .cloned();
        match next {
            Some(n) => current = n,
            None => return path,
        }
    }
}

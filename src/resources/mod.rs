pub(crate) use serde::Serialize;
pub(crate) use serde_json::{json, Value};

pub(crate) use crate::context::{ResourceOptions, Scope, DEFAULT_CHILD_ID};
#[cfg(test)]
pub(crate) use crate::context::Stack;
pub(crate) use crate::error::{Error, Result};
pub(crate) use crate::template::{cfn_resource, get_att, get_ref, join, sub, RemovalPolicy};

mod iam;
pub use iam::*;
mod lambda;
pub use lambda::*;
mod s3_bucket;
pub use s3_bucket::*;
mod cloudfront;
pub use cloudfront::*;
mod deployment;
pub use deployment::*;

// higher level resources:
mod static_website;
pub use static_website::*;

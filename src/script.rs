use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};

/// wraps `value` in single quotes so the shell passes it through untouched.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[derive(Debug, Clone)]
enum ParamValue {
    Literal(String),
    /// expanded by the shell when the script runs.
    Expansion(String),
}

/// the shell script that builds, packages and deploys a synthesized stack.
/// constructs contribute commands to each phase while the stack is declared.
/// Commands are added verbatim: callers quote the values they interpolate.
#[derive(Debug, Default, Clone)]
pub struct DeployScript {
    build: Vec<String>,
    package: Vec<String>,
    post: Vec<String>,
    parameter_values: Vec<(String, ParamValue)>,
}

impl DeployScript {
    pub fn add_build_cmd<S: AsRef<str>>(&mut self, cmd: S) {
        self.build.push(cmd.as_ref().into());
    }

    pub fn add_package_cmd<S: AsRef<str>>(&mut self, cmd: S) {
        self.package.push(cmd.as_ref().into());
    }

    pub fn add_post_cmd<S: AsRef<str>>(&mut self, cmd: S) {
        self.post.push(cmd.as_ref().into());
    }

    /// the value is passed to the deploy exactly as given.
    pub fn add_param_value<S: AsRef<str>, S1: AsRef<str>>(&mut self, key: S, value: S1) {
        self.parameter_values.push((key.as_ref().into(), ParamValue::Literal(value.as_ref().into())));
    }

    /// the value is placed inside double quotes, so shell expansions
    /// like `$(date +%s)` are evaluated at deploy time.
    pub fn add_param_expansion<S: AsRef<str>, S1: AsRef<str>>(&mut self, key: S, expansion: S1) {
        self.parameter_values.push((key.as_ref().into(), ParamValue::Expansion(expansion.as_ref().into())));
    }

    pub fn render(&self, stack_name: &str, region: &str, template_file: &Path) -> String {
        let mut out = String::from("#!/usr/bin/env bash\nset -euo pipefail\n\n");
        out.push_str("# build:\n");
        for step in self.build.iter() {
            out.push_str(step);
            out.push('\n');
        }
        out.push_str("\n# package:\n");
        for step in self.package.iter() {
            out.push_str(step);
            out.push('\n');
        }
        out.push_str("\n# deploy:\n");
        let region = shell_quote(region);
        let stack_name = shell_quote(stack_name);
        let template_file = shell_quote(&template_file.display().to_string());
        let mut cmd = format!(
            "AWS_REGION={region} aws --region {region} cloudformation deploy --stack-name {stack_name} --template-file {template_file} --capabilities CAPABILITY_IAM CAPABILITY_NAMED_IAM --no-fail-on-empty-changeset"
        );
        if !self.parameter_values.is_empty() {
            cmd.push_str(" --parameter-overrides");
            for (key, value) in &self.parameter_values {
                let arg = match value {
                    ParamValue::Literal(v) => shell_quote(&format!("{key}={v}")),
                    ParamValue::Expansion(v) => format!("\"{key}={v}\""),
                };
                cmd.push(' ');
                cmd.push_str(&arg);
            }
        }
        out.push_str(&cmd);
        out.push('\n');
        if !self.post.is_empty() {
            out.push_str("\n# outputs:\n");
            for step in self.post.iter() {
                out.push_str(step);
                out.push('\n');
            }
        }
        out
    }

    pub fn write(&self, path: &Path, stack_name: &str, region: &str, template_file: &Path) -> Result<()> {
        let contents = self.render(stack_name, region, template_file);
        let mut file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
        file.write_all(contents.as_bytes()).map_err(|e| Error::io(path, e))?;
        file.flush().map_err(|e| Error::io(path, e))?;
        make_executable(path)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path).map_err(|e| Error::io(path, e))?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(path, perms).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

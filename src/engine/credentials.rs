use std::process::Command;

use crate::config::Secret;

pub const PASSWORD_ENV: &str = "PGPASSWORD";

/// Hands the database password to PostgreSQL client tools.
///
/// The password is set in the child's environment only, never in argv.
/// `--no-password` makes the tool fail instead of prompting when no password
/// is configured (trust or peer authentication).
#[derive(Debug, Clone, Default)]
pub struct PgCredentials {
    password: Option<Secret>,
}

impl PgCredentials {
    pub fn new(password: Option<Secret>) -> Self {
        Self { password }
    }

    pub fn password(&self) -> Option<&Secret> {
        self.password.as_ref()
    }

    pub fn supply(&self, cmd: &mut Command) {
        cmd.arg("--no-password");
        match &self.password {
            Some(password) => {
                cmd.env(PASSWORD_ENV, password.expose());
            }
            None => {
                cmd.env_remove(PASSWORD_ENV);
            }
        }
    }
}

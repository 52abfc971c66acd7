//! Build environments a change can be processed for.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// The environment a change event targets. Only `Dev` receives fresh
/// publishes; `Test` and `Prod` are promotion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
  Dev,
  Test,
  Prod,
}

impl Env {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Dev => "dev",
      Self::Test => "test",
      Self::Prod => "prod",
    }
  }

  pub fn is_development(self) -> bool { matches!(self, Self::Dev) }
}

impl fmt::Display for Env {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Env {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "dev" => Ok(Self::Dev),
      "test" => Ok(Self::Test),
      "prod" => Ok(Self::Prod),
      other => Err(Error::InvalidEnvironment(other.to_owned())),
    }
  }
}

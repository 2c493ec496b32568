//! The ordered catalog of migration steps.
//!
//! Steps are registered once at startup, each with a version number and a short
//! description, in strictly ascending version order:
//!
//! ```
//! use migrastep::{Error, MigrationContext, MigrationStep, MigrationStepRegistry};
//!
//! struct AddUsersTable;
//! impl MigrationStep for AddUsersTable {
//!     fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error> {
//!         ctx.connection().execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY)")?;
//!         Ok(())
//!     }
//! }
//!
//! struct PopulateUsers;
//! impl MigrationStep for PopulateUsers {
//!     fn execute(&self, _ctx: &MigrationContext<'_>) -> Result<(), Error> {
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = MigrationStepRegistry::new();
//! registry
//!     .add(3300, "Add users table", || AddUsersTable)?
//!     .add(3301, "Populate users", || PopulateUsers)?
//!     // numbering may jump between releases
//!     .add(3400, "Drop legacy users", || PopulateUsers)?;
//!
//! assert_eq!(registry.versions().collect::<Vec<_>>(), vec![3300, 3301, 3400]);
//! assert!(registry.add(3301, "Too late", || PopulateUsers).is_err());
//! # Ok::<(), Error>(())
//! ```

use crate::error::Error;
use crate::step::MigrationStep;
use sha2::{Digest, Sha256};

type StepFactory = Box<dyn Fn() -> Box<dyn MigrationStep> + Send + Sync>;

/// A step as known to the registry.
pub struct RegisteredStep {
    version: u32,
    description: String,
    factory: StepFactory,
}

impl RegisteredStep {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// A fresh instance of the step, built for one execution.
    pub fn instantiate(&self) -> Box<dyn MigrationStep> {
        (self.factory)()
    }

    /// Fingerprint of the version and description, stored when the step is applied.
    pub fn checksum(&self) -> String {
        checksum(self.version, &self.description)
    }
}

pub(crate) fn checksum(version: u32, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(description.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl std::fmt::Debug for RegisteredStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredStep")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish()
    }
}

impl PartialEq for RegisteredStep {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.description == other.description
    }
}

/// Ordered, duplicate-free catalog of steps.
///
/// Registration fails fast: a version that is not above every version registered so
/// far, or below the floor, is rejected by [MigrationStepRegistry::add].
///
/// Versions need not be gap-free: numbering usually jumps between releases (from the
/// 3300s to 3400s, say), so by default only strict ascent is enforced. A registry built
/// with [MigrationStepRegistry::contiguous] requires each version to be exactly one
/// above the previous one.
#[derive(Debug)]
pub struct MigrationStepRegistry {
    steps: Vec<RegisteredStep>,
    floor: u32,
    contiguous: bool,
}

impl Default for MigrationStepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationStepRegistry {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            floor: 1,
            contiguous: false,
        }
    }

    /// A registry requiring every version to be exactly the previous one plus one.
    pub fn contiguous() -> Self {
        Self {
            contiguous: true,
            ..Self::new()
        }
    }

    /// Lowest version accepted, 1 by default. Databases older than the floor must be
    /// upgraded by an earlier release first.
    pub fn with_floor(mut self, floor: u32) -> Self {
        self.floor = floor.max(1);
        self
    }

    /// Build a registry from `(version, description, step)` tuples, validating them in
    /// order.
    pub fn try_from_steps<I, D>(steps: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (u32, D, fn() -> Box<dyn MigrationStep>)>,
        D: Into<String>,
    {
        let mut registry = Self::new();
        for (version, description, factory) in steps {
            registry.register(version, description.into(), Box::new(factory))?;
        }
        Ok(registry)
    }

    pub fn add<S, F>(
        &mut self,
        version: u32,
        description: impl Into<String>,
        factory: F,
    ) -> Result<&mut Self, Error>
    where
        S: MigrationStep + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.register(
            version,
            description.into(),
            Box::new(move || Box::new(factory()) as Box<dyn MigrationStep>),
        )?;
        Ok(self)
    }

    fn register(
        &mut self,
        version: u32,
        description: String,
        factory: StepFactory,
    ) -> Result<(), Error> {
        if version < self.floor {
            return Err(Error::Registration(format!(
                "Migration step version {} is below the minimum supported version {}",
                version, self.floor
            )));
        }
        if let Some(last) = self.last_version() {
            if version == last {
                return Err(Error::Registration(format!(
                    "Duplicate migration step version found: {}",
                    version
                )));
            }
            if version < last {
                return Err(Error::Registration(format!(
                    "Migration step versions must be registered in ascending order, found {} after {}",
                    version, last
                )));
            }
            if self.contiguous && version != last + 1 {
                return Err(Error::Registration(format!(
                    "Migration step versions must be contiguous. Expected version {}, found {}",
                    last + 1,
                    version
                )));
            }
        }
        if description.trim().is_empty() {
            return Err(Error::Registration(format!(
                "Migration step {} must have a description",
                version
            )));
        }
        self.steps.push(RegisteredStep {
            version,
            description,
            factory,
        });
        Ok(())
    }

    /// Steps with a version strictly greater than `current`, in ascending order.
    ///
    /// The iterator is lazy and single-pass; call again to restart from another version.
    pub fn resolve_pending(&self, current: u32) -> impl Iterator<Item = &RegisteredStep> + '_ {
        let start = self.steps.partition_point(|s| s.version <= current);
        self.steps[start..].iter()
    }

    pub fn get(&self, version: u32) -> Option<&RegisteredStep> {
        self.steps
            .binary_search_by_key(&version, |s| s.version)
            .ok()
            .map(|i| &self.steps[i])
    }

    pub fn steps(&self) -> &[RegisteredStep] {
        &self.steps
    }

    pub fn versions(&self) -> impl Iterator<Item = u32> + '_ {
        self.steps.iter().map(|s| s.version)
    }

    pub fn last_version(&self) -> Option<u32> {
        self.steps.last().map(|s| s.version)
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

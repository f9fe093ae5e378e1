use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::CoreError;
use crate::document::VERSION_FIELD;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single-step transformer from `from_version` to `from_version + 1`.
///
/// Migrators are pure: the same input must always produce the same output.
pub trait Migrator {
    fn from_version(&self) -> u32;

    fn to_version(&self) -> u32 {
        self.from_version().saturating_add(1)
    }

    fn migrate(&self, input: &str) -> Result<String, BoxError>;

    fn label(&self) -> String {
        format!("v{}->v{}", self.from_version(), self.to_version())
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("save payload is empty")]
    EmptyInput,

    #[error("save version unreadable: {0}")]
    VersionUnreadable(String),

    #[error("save version {found} is newer than supported version {latest}")]
    VersionTooNew { found: u32, latest: u32 },

    #[error("no migrator registered for version {version}")]
    NoMigratorRegistered { version: u32 },

    #[error("migration v{from}->v{to} failed: {source}")]
    MigrationStepFailed {
        from: u32,
        to: u32,
        #[source]
        source: BoxError,
    },

    #[error("migration v{from}->v{to} produced unexpected version {found}")]
    UnexpectedOutputVersion { from: u32, to: u32, found: u32 },
}

/// Diagnostics for one load attempt. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub source_version: u32,
    pub final_version: u32,
    pub was_migrated: bool,
    pub applied_steps: Vec<String>,
    pub failure_reason: String,
}

#[derive(Debug)]
pub struct PreparedPayload {
    pub payload: String,
    pub report: MigrationReport,
}

/// A failed load attempt: the error plus the report as far as it got.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct MigrationFailure {
    #[source]
    pub error: MigrationError,
    pub report: MigrationReport,
}

pub struct MigrationPipeline {
    latest_version: u32,
    migrators: BTreeMap<u32, Box<dyn Migrator + Send + Sync>>,
}

impl MigrationPipeline {
    pub fn new(latest_version: u32) -> Self {
        Self {
            latest_version,
            migrators: BTreeMap::new(),
        }
    }

    pub fn latest_version(&self) -> u32 {
        self.latest_version
    }

    /// Register a migrator. Each `from_version` may be registered once and
    /// every migrator must advance exactly one version.
    pub fn register(
        &mut self,
        migrator: impl Migrator + Send + Sync + 'static,
    ) -> Result<(), CoreError> {
        let from = migrator.from_version();
        if from.checked_add(1) != Some(migrator.to_version()) {
            return Err(CoreError::InvalidMigrator(format!(
                "migrator {} must advance exactly one version",
                migrator.label()
            )));
        }
        if self.migrators.contains_key(&from) {
            return Err(CoreError::InvalidMigrator(format!(
                "a migrator for version {from} is already registered"
            )));
        }
        self.migrators.insert(from, Box::new(migrator));
        Ok(())
    }

    pub fn with_migrator(
        mut self,
        migrator: impl Migrator + Send + Sync + 'static,
    ) -> Result<Self, CoreError> {
        self.register(migrator)?;
        Ok(self)
    }

    /// Check that migrators cover every version from 0 up to latest.
    pub fn verify_chain(&self) -> Result<(), CoreError> {
        match (0..self.latest_version).find(|v| !self.migrators.contains_key(v)) {
            Some(missing) => Err(CoreError::BrokenChain { missing }),
            None => Ok(()),
        }
    }

    /// Bring `raw` up to the latest schema version.
    ///
    /// A payload already at the latest version is returned unchanged.
    pub fn prepare_for_load(&self, raw: &str) -> Result<PreparedPayload, MigrationFailure> {
        let mut report = MigrationReport::default();

        if raw.trim().is_empty() {
            return Err(fail(report, MigrationError::EmptyInput));
        }

        let source_version = match read_version(raw) {
            Ok(v) => v,
            Err(e) => return Err(fail(report, e)),
        };
        report.source_version = source_version;
        report.final_version = source_version;

        if source_version > self.latest_version {
            return Err(fail(
                report,
                MigrationError::VersionTooNew {
                    found: source_version,
                    latest: self.latest_version,
                },
            ));
        }

        let mut current_version = source_version;
        let mut current = raw.to_string();

        while current_version < self.latest_version {
            let Some(migrator) = self.migrators.get(&current_version) else {
                return Err(fail(
                    report,
                    MigrationError::NoMigratorRegistered {
                        version: current_version,
                    },
                ));
            };
            let from = migrator.from_version();
            let to = migrator.to_version();

            let next = match migrator.migrate(&current) {
                Ok(next) => next,
                Err(source) => {
                    return Err(fail(
                        report,
                        MigrationError::MigrationStepFailed { from, to, source },
                    ));
                }
            };

            let next_version = match read_version(&next) {
                Ok(v) => v,
                Err(MigrationError::VersionUnreadable(reason)) => {
                    return Err(fail(
                        report,
                        MigrationError::VersionUnreadable(format!(
                            "output of v{from}->v{to}: {reason}"
                        )),
                    ));
                }
                Err(e) => return Err(fail(report, e)),
            };
            if next_version != to {
                return Err(fail(
                    report,
                    MigrationError::UnexpectedOutputVersion {
                        from,
                        to,
                        found: next_version,
                    },
                ));
            }

            report.applied_steps.push(migrator.label());
            report.was_migrated = true;
            report.final_version = next_version;
            current_version = next_version;
            current = next;
        }

        Ok(PreparedPayload {
            payload: current,
            report,
        })
    }
}

fn fail(mut report: MigrationReport, error: MigrationError) -> MigrationFailure {
    report.failure_reason = error.to_string();
    MigrationFailure { error, report }
}

/// Read only the version envelope. A JSON object without the field is a
/// legacy version-0 payload; negative versions clamp to 0.
pub fn read_version(json: &str) -> Result<u32, MigrationError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| MigrationError::VersionUnreadable(format!("json parse error: {e}")))?;
    let Some(object) = value.as_object() else {
        return Err(MigrationError::VersionUnreadable(
            "version envelope is not an object".into(),
        ));
    };
    match object.get(VERSION_FIELD) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => {
            let version = v.as_i64().ok_or_else(|| {
                MigrationError::VersionUnreadable(format!("{VERSION_FIELD} is not an integer: {v}"))
            })?;
            u32::try_from(version.max(0)).map_err(|_| {
                MigrationError::VersionUnreadable(format!("{VERSION_FIELD} out of range: {version}"))
            })
        }
    }
}

/// Migrator backed by a closure.
pub struct FnMigrator<F> {
    from_version: u32,
    f: F,
}

impl<F> FnMigrator<F>
where
    F: Fn(&str) -> Result<String, BoxError>,
{
    pub fn new(from_version: u32, f: F) -> Self {
        Self { from_version, f }
    }
}

impl<F> Migrator for FnMigrator<F>
where
    F: Fn(&str) -> Result<String, BoxError>,
{
    fn from_version(&self) -> u32 {
        self.from_version
    }

    fn migrate(&self, input: &str) -> Result<String, BoxError> {
        (self.f)(input)
    }
}

/// Fills absent or null top-level fields with defaults and stamps the next
/// version. Existing values are kept as they are.
pub struct DefaultsMigrator {
    from_version: u32,
    defaults: Map<String, Value>,
}

impl DefaultsMigrator {
    pub fn new(from_version: u32, defaults: Map<String, Value>) -> Self {
        Self {
            from_version,
            defaults,
        }
    }
}

impl Migrator for DefaultsMigrator {
    fn from_version(&self) -> u32 {
        self.from_version
    }

    fn migrate(&self, input: &str) -> Result<String, BoxError> {
        let mut value: Value = serde_json::from_str(input)?;
        let object = value
            .as_object_mut()
            .ok_or("legacy payload is not a JSON object")?;
        for (key, default) in &self.defaults {
            if key == VERSION_FIELD {
                continue;
            }
            match object.get(key) {
                Some(existing) if !existing.is_null() => {}
                _ => {
                    object.insert(key.clone(), default.clone());
                }
            }
        }
        object.insert(VERSION_FIELD.to_string(), Value::from(self.to_version()));
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

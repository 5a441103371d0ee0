pub mod models;

pub mod binary;

pub use models::{
    Build, CoverageStats, CoverageTotals, FileEntry, FileEntryBuilder, Files, Function,
    FunctionCoverage, LineCov, LineCoverage, Marks, Rating, Ratio, Report, ReportBuilder,
};

use crate::error::{CovError, Result};

/// Discriminator for the five stored object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Report,
    Build,
    Files,
    LineCoverage,
    FunctionCoverage,
}

/// A loaded object: the tagged sum the loose backend hands out.
///
/// Downstream code either matches on the variant or calls a typed accessor,
/// which reports `WrongObjectType` on a kind mismatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Report(Report),
    Build(Build),
    Files(Files),
    LineCoverage(LineCoverage),
    FunctionCoverage(FunctionCoverage),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Report(_) => ObjectKind::Report,
            Object::Build(_) => ObjectKind::Build,
            Object::Files(_) => ObjectKind::Files,
            Object::LineCoverage(_) => ObjectKind::LineCoverage,
            Object::FunctionCoverage(_) => ObjectKind::FunctionCoverage,
        }
    }

    pub fn into_report(self) -> Result<Report> {
        match self {
            Object::Report(value) => Ok(value),
            _ => Err(CovError::WrongObjectType),
        }
    }

    pub fn into_build(self) -> Result<Build> {
        match self {
            Object::Build(value) => Ok(value),
            _ => Err(CovError::WrongObjectType),
        }
    }

    pub fn into_files(self) -> Result<Files> {
        match self {
            Object::Files(value) => Ok(value),
            _ => Err(CovError::WrongObjectType),
        }
    }

    pub fn into_line_coverage(self) -> Result<LineCoverage> {
        match self {
            Object::LineCoverage(value) => Ok(value),
            _ => Err(CovError::WrongObjectType),
        }
    }

    pub fn into_function_coverage(self) -> Result<FunctionCoverage> {
        match self {
            Object::FunctionCoverage(value) => Ok(value),
            _ => Err(CovError::WrongObjectType),
        }
    }

    pub fn as_report(&self) -> Option<&Report> {
        match self {
            Object::Report(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Report> for Object {
    fn from(value: Report) -> Object {
        Object::Report(value)
    }
}

impl From<Build> for Object {
    fn from(value: Build) -> Object {
        Object::Build(value)
    }
}

impl From<Files> for Object {
    fn from(value: Files) -> Object {
        Object::Files(value)
    }
}

impl From<LineCoverage> for Object {
    fn from(value: LineCoverage) -> Object {
        Object::LineCoverage(value)
    }
}

impl From<FunctionCoverage> for Object {
    fn from(value: FunctionCoverage) -> Object {
        Object::FunctionCoverage(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let obj = Object::from(LineCoverage::default());
        assert_eq!(obj.kind(), ObjectKind::LineCoverage);
        assert!(obj.as_report().is_none());
        assert!(matches!(
            obj.clone().into_report(),
            Err(CovError::WrongObjectType)
        ));
        assert!(obj.into_line_coverage().is_ok());
    }
}

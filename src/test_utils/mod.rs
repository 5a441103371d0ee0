pub mod fake_scm;
pub mod scratch;

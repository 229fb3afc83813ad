//! Injectable sources of "now", grounded on the teacher's `utils::time` module. Verification needs
//! the current time exactly once, to check certificate validity windows and `ValidityInfo`; going
//! through a trait instead of calling `chrono::Utc::now()` directly lets tests pin time without
//! reaching for a global mock.

use chrono::{DateTime, Utc};

pub trait Generator<T> {
    fn generate(&self) -> T;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeGenerator;

impl Generator<DateTime<Utc>> for SystemTimeGenerator {
    fn generate(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "mock"))]
#[derive(Debug, Clone, Copy)]
pub struct MockTimeGenerator(pub DateTime<Utc>);

#[cfg(any(test, feature = "mock"))]
impl Generator<DateTime<Utc>> for MockTimeGenerator {
    fn generate(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(any(test, feature = "mock"))]
impl Default for MockTimeGenerator {
    fn default() -> Self {
        Self(Utc::now())
    }
}

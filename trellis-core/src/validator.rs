// Validation extension point

use crate::{Error, Result};
use std::any::{Any, type_name};
use std::marker::PhantomData;

/// Validates a bound value on behalf of a route.
///
/// Never part of the chain: handlers call it through [`Context::validate`].
///
/// [`Context::validate`]: crate::Context::validate
pub trait Validator: Send + Sync {
    fn validate(&self, value: &dyn Any) -> Result<()>;

    fn name(&self) -> &'static str {
        "validator"
    }
}

/// Types that know how to check themselves.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Adapts a closure over `&T` into a [`Validator`].
///
/// Values of any other type are rejected.
pub struct ValidatorFn<T, F> {
    f: F,
    _marker: PhantomData<fn(&T)>,
}

/// Build a [`ValidatorFn`].
pub fn validator_fn<T, F>(f: F) -> ValidatorFn<T, F>
where
    T: Any,
    F: Fn(&T) -> Result<()> + Send + Sync,
{
    ValidatorFn {
        f,
        _marker: PhantomData,
    }
}

impl<T, F> Validator for ValidatorFn<T, F>
where
    T: Any,
    F: Fn(&T) -> Result<()> + Send + Sync,
{
    fn validate(&self, value: &dyn Any) -> Result<()> {
        match value.downcast_ref::<T>() {
            Some(v) => (self.f)(v),
            None => Err(Error::Validation(format!(
                "validator expects {}",
                type_name::<T>()
            ))),
        }
    }

    fn name(&self) -> &'static str {
        type_name::<T>()
    }
}

/// Runs [`Validate::validate`] on values of type `T`.
pub struct SelfValidator<T>(PhantomData<fn(&T)>);

impl<T> SelfValidator<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SelfValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Validate + Any> Validator for SelfValidator<T> {
    fn validate(&self, value: &dyn Any) -> Result<()> {
        match value.downcast_ref::<T>() {
            Some(v) => v.validate(),
            None => Err(Error::Validation(format!(
                "validator expects {}",
                type_name::<T>()
            ))),
        }
    }

    fn name(&self) -> &'static str {
        type_name::<T>()
    }
}

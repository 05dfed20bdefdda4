//! Wrapping functions so each call logs an event before it runs.
//!
//! ```ignore
//! let audited = eventit_core::instrument!(logger.event(options), export_report);
//! let report = audited.call((user_id, format))?;
//! ```
//!
//! A logging failure is returned from [`Instrumented::call`] and the wrapped
//! function is not invoked.

use std::fmt;
use std::panic::Location;

use crate::errors::Result;
use crate::logger::{EventLogger, EventOptions};
use crate::metrics::FunctionRef;

/// Functions callable with their arguments packed in a tuple.
pub trait Callable<Args> {
    type Output;

    fn invoke(&self, args: Args) -> Self::Output;
}

macro_rules! impl_callable {
    ($($ty:ident),*) => {
        impl<Func, Ret, $($ty,)*> Callable<($($ty,)*)> for Func
        where
            Func: Fn($($ty),*) -> Ret,
        {
            type Output = Ret;

            #[allow(non_snake_case)]
            fn invoke(&self, ($($ty,)*): ($($ty,)*)) -> Ret {
                (self)($($ty),*)
            }
        }
    };
}

impl_callable!();
impl_callable!(T1);
impl_callable!(T1, T2);
impl_callable!(T1, T2, T3);
impl_callable!(T1, T2, T3, T4);
impl_callable!(T1, T2, T3, T4, T5);
impl_callable!(T1, T2, T3, T4, T5, T6);

/// Wrapper factory bound to a logger and a set of [`EventOptions`].
#[derive(Clone)]
pub struct EventDecorator {
    logger: EventLogger,
    options: EventOptions,
}

impl EventDecorator {
    pub(crate) fn new(logger: EventLogger, options: EventOptions) -> Self {
        Self { logger, options }
    }

    pub fn options(&self) -> &EventOptions {
        &self.options
    }

    pub fn wrap<F>(&self, function: impl Into<FunctionRef>, f: F) -> Instrumented<F> {
        Instrumented {
            logger: self.logger.clone(),
            function: function.into(),
            options: self.options.clone(),
            f,
        }
    }
}

impl fmt::Debug for EventDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDecorator")
            .field("options", &self.options)
            .finish()
    }
}

/// A function that logs an event every time it is called.
#[derive(Clone)]
pub struct Instrumented<F> {
    logger: EventLogger,
    function: FunctionRef,
    options: EventOptions,
    f: F,
}

impl<F> Instrumented<F> {
    /// Log, then run the wrapped function with `args` and return its result.
    #[track_caller]
    pub fn call<Args>(&self, args: Args) -> Result<<F as Callable<Args>>::Output>
    where
        F: Callable<Args>,
    {
        self.logger
            .log_event_at(Some(&self.function), &self.options, Location::caller())?;
        Ok(self.f.invoke(args))
    }

    pub fn function(&self) -> &FunctionRef {
        &self.function
    }

    pub fn inner(&self) -> &F {
        &self.f
    }

    pub fn into_inner(self) -> F {
        self.f
    }
}

impl<F> fmt::Debug for Instrumented<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented")
            .field("function", &self.function)
            .field("options", &self.options)
            .finish()
    }
}

/// [`FunctionRef`] for a function path, tagged with the calling module.
#[macro_export]
macro_rules! function_ref {
    ($func:path) => {
        $crate::metrics::FunctionRef::new(stringify!($func)).in_module(module_path!())
    };
}

/// Wrap a named function with an [`EventDecorator`], using the function's
/// own name for the `function_name` metric.
#[macro_export]
macro_rules! instrument {
    ($decorator:expr, $func:path) => {
        $decorator.wrap($crate::function_ref!($func), $func)
    };
}

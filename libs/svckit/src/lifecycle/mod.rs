//! Component lifecycle: state machine, hook contract, execution context.

mod component;
mod context;
mod state;

pub use component::{ComponentSlot, LifecycleComponent, LifecycleHooks, ManagedComponent};
pub use context::LifecycleCtx;
pub use state::{Lifecycle, LifecyclePhase, LifecycleState, Transition};

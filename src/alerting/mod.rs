pub mod dispatcher;

pub use dispatcher::{AlertDispatcher, DispatchError, DispatchReport};

mod kind;

pub use failure::err_msg;
pub use failure::format_err;
pub use failure::Error;
pub use failure::Fail;

pub use kind::ErrorKind;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Builds a [`crate::Error`] from a variant of one of the module-level error
/// enums (or of [`ErrorKind`] itself). Fields are written like in a struct
/// literal, each value goes through [`Into`], so `&str` fields can be given
/// where a `String` is stored.
///
/// ```ignore
/// Err(err!(ProviderError::NoResults { url: url.as_str() }))
/// ```
macro_rules! err {
    (@field $name:ident $value:expr) => ($value);
    (@field $name:ident) => ($name);
    ($kind:path $({
        $( $name:ident $(: $value:expr)? ),*
        $(,)?
    })?) => {{
        use $kind as Kind;

        $crate::error::Error::from(
            Kind $({$(
                $name: ::std::convert::Into::into(
                    $crate::error::err!(@field $name $($value)?)
                )
            ),*})?
        )
    }};
}

/// Closure for `map_err` that puts the mapped error into the `source` field
/// of the given variant
macro_rules! err_ctx {
    ($kind:path $({ $($fields:tt)* })?) => {
        |source| $crate::error::err!($kind { source, $($($fields)*)? })
    };
}

/// [`ErrorKind::Fatal`] with a formatted message and no source
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::error::err!($crate::error::ErrorKind::Fatal {
            message: format!($($arg)*),
            source: None,
        })
    };
}

pub(crate) use err;
pub(crate) use err_ctx;
pub(crate) use fatal;

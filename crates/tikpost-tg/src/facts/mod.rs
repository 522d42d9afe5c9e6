//! Pools of textual facts published to the channel.
mod import;
mod store;

pub(crate) use import::*;
pub(crate) use store::*;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum FactKind {
    /// One line of text
    Short,

    /// A paragraph that may span several lines
    Medium,
}

impl FactKind {
    pub(crate) fn as_str(self) -> &'static str {
        self.into()
    }
}

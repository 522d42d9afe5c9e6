use easy_ext::ext;

pub(crate) mod prelude {
    pub(crate) use super::ErrorExt as _;
    pub(crate) use super::StrExt as _;
}

#[ext(ErrorExt)]
pub(crate) impl<E> E
where
    E: std::error::Error + ?Sized,
{
    fn display_chain(&self) -> display_error_chain::DisplayErrorChain<&Self> {
        display_error_chain::DisplayErrorChain::new(self)
    }
}

#[ext(StrExt)]
pub(crate) impl str {
    /// Keeps at most `max_chars` trailing characters of the string. Useful to
    /// show only the tail of a long process output where the error usually is.
    fn tail_chars(&self, max_chars: usize) -> &str {
        let skip = self.chars().count().saturating_sub(max_chars);
        match self.char_indices().nth(skip) {
            Some((start, _)) => &self[start..],
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_chars() {
        assert_eq!("hello".tail_chars(3), "llo");
        assert_eq!("hello".tail_chars(10), "hello");
        assert_eq!("привет".tail_chars(2), "ет");
        assert_eq!("".tail_chars(2), "");
        assert_eq!("abc".tail_chars(0), "");
    }
}

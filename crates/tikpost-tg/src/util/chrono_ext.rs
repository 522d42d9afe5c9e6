use chrono::prelude::*;
use easy_ext::ext;

#[ext(DateTimeExt)]
pub(crate) impl<Tz: chrono::TimeZone> DateTime<Tz> {
    fn to_human_readable(&self, offset: FixedOffset) -> String {
        self.with_timezone(&offset)
            .format("%Y-%m-%d %H:%M:%S (GMT%:z)")
            .to_string()
    }
}

use std::io;

/// Types that know how to write themselves into an outgoing frame body.
pub trait Serialize {
    fn serialize(&self, buf: &mut Vec<u8>) -> io::Result<()>;
}

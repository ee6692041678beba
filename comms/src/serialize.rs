/// Writes a value into a framing buffer.
pub trait Serialize<'a> {
    /// Serializes `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer where the owned part of the message gets written.
    ///
    /// # Returns
    /// An optional borrowed tail that is sent right after `buf` without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}

//! Fill buffers with the digit pattern the client sends.

const DIGIT: &[u8] = b"0123456789";

/// Initialize a buffer with the pattern starting at stream position `offset`.
pub fn init(buf: &mut [u8], offset: usize) {
    buf.iter_mut()
        .zip(DIGIT.iter().cycle().skip(offset % DIGIT.len()))
        .for_each(|(byte, digit)| *byte = *digit);
}

/// MSB-first bit packer over a fixed-size byte buffer.
///
/// MPEG system headers are full of odd-width fields (3-bit clock slices,
/// 22-bit rate bounds, single marker bits). `BitWriter` lets the muxer
/// write them in the order the standard lists them:
///
/// ```
/// use psrtp::media::bits::BitWriter;
///
/// let mut w = BitWriter::new(2);
/// w.put(2, 0b01);
/// w.put(3, 0b101);
/// w.put(11, 0x7ff);
/// assert_eq!(w.finish(), vec![0b0110_1111, 0xff]);
/// ```
///
/// Values wider than their field are masked to the low `width` bits.
/// Writing past the end of the buffer drops the overflowing bits.
#[derive(Debug)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    /// Allocate a zeroed buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0; len],
            bit_pos: 0,
        }
    }

    /// Write the low `width` bits of `value`, most significant bit first.
    pub fn put(&mut self, width: u32, value: u64) {
        debug_assert!(width <= 64);
        for i in (0..width).rev() {
            let byte = self.bit_pos / 8;
            if byte >= self.buf.len() {
                tracing::warn!(width, bit_pos = self.bit_pos, "bit writer overflow");
                return;
            }
            if (value >> i) & 1 == 1 {
                self.buf[byte] |= 0x80 >> (self.bit_pos % 8);
            }
            self.bit_pos += 1;
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

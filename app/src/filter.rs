/// First-order IIR low pass over a set of TSC channels.
///
/// State is kept with `FRAC_BITS` of fraction so small steps aren't lost to
/// truncation. Each update moves the output by `1 / 2^shift` of the error.
pub struct IirFilter<const N: usize> {
    state: [u32; N],
    shift: u8,
    primed: bool,
}

const FRAC_BITS: u32 = 4;

impl<const N: usize> IirFilter<N> {
    pub const fn new(shift: u8) -> Self {
        Self {
            state: [0; N],
            shift,
            primed: false,
        }
    }

    /// Feed one raw acquisition, returning the filtered values
    pub fn update(&mut self, raw: &[u16; N]) -> [u16; N] {
        if !self.primed {
            // Start from the first sample instead of ramping up from zero
            for i in 0..N {
                self.state[i] = (raw[i] as u32) << FRAC_BITS;
            }
            self.primed = true;
        } else {
            for i in 0..N {
                let target = (raw[i] as u32) << FRAC_BITS;
                let current = self.state[i];
                self.state[i] = if target >= current {
                    current + ((target - current) >> self.shift)
                } else {
                    current - ((current - target) >> self.shift)
                };
            }
        }

        let mut out = [0u16; N];
        for i in 0..N {
            out[i] = (self.state[i] >> FRAC_BITS) as u16;
        }
        out
    }
}

// RC4 has no maintained RustCrypto implementation, and the algorithm is
// a handful of lines, so it lives here.

pub struct Rc4 {
    initial_state: [u8; 256],
}

impl Rc4 {
    pub fn new<K: AsRef<[u8]>>(key: K) -> Rc4 {
        let key = key.as_ref();
        assert!(!key.is_empty() && key.len() <= 256);

        let mut initial_state = [0_u8; 256];
        for (i, v) in initial_state.iter_mut().enumerate() {
            *v = i as u8;
        }

        let mut j = 0_u8;
        for i in 0..256 {
            j = j.wrapping_add(initial_state[i]).wrapping_add(key[i % key.len()]);
            initial_state.swap(i, j as usize);
        }

        Rc4 { initial_state }
    }

    /// XOR the keystream over `data`. RC4 is symmetric, so this is both
    /// encryption and decryption.
    pub fn apply<D: AsRef<[u8]>>(&self, data: D) -> Vec<u8> {
        let data = data.as_ref();
        let mut state = self.initial_state;
        let mut output = Vec::with_capacity(data.len());

        let mut i = 0_u8;
        let mut j = 0_u8;
        for byte in data {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[i as usize]);
            state.swap(i as usize, j as usize);
            let key_byte = state[(state[i as usize].wrapping_add(state[j as usize])) as usize];
            output.push(byte ^ key_byte);
        }

        output
    }
}

/// Returns a `Box<[T; LEN]>` filled with `elem`.
#[inline(always)]
pub fn boxed_array<T: Clone, const LEN: usize>(elem: T) -> Box<[T; LEN]> {
    let boxed: Box<[T]> = vec![elem; LEN].into_boxed_slice();
    match boxed.try_into() {
        Ok(array) => array,
        Err(_) => unreachable!("vector has exactly LEN elements"),
    }
}

/// Adler-32 checksum of `data`.
pub fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    // largest n such that 255n(n+1)/2 + (n+1)(MOD-1) fits in a u32
    const CHUNK: usize = 5552;

    let mut a = 1u32;
    let mut b = 0u32;
    for chunk in data.chunks(CHUNK) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }

        a %= MOD;
        b %= MOD;
    }

    (b << 16) | a
}

use uuid::Uuid;

pub fn request_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

pub fn random_u64() -> u64 {
    // 复用 UUID v4 的随机源，避免额外引入 rand/getrandom 依赖。
    let b = *Uuid::new_v4().as_bytes();
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// [0, upper) 内的随机数；upper <= 1 时恒为 0。
pub fn random_usize(upper: usize) -> usize {
    if upper <= 1 {
        return 0;
    }
    (random_u64() as usize) % upper
}

/// Fisher–Yates 原地洗牌。
pub fn shuffle<T>(items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = random_usize(i + 1);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_keeps_every_element() {
        let mut v: Vec<u32> = (0..64).collect();
        shuffle(&mut v);
        let mut sorted = v.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(request_id(), request_id());
        assert!(request_id().starts_with("req-"));
    }
}

//! Light bags: small stratified subsets of the light list.
//!
//! Pixels in the same screen-space grid cell draw their candidates from one
//! bag, which keeps their light accesses coherent.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use super::Cdf;
use crate::util::{wang_hash, Rng};

/// One entry of a light bag.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightBagEntry {
    pub light_index: u32,
    /// Probability that the CDF draws this light.
    pub pdf: f32,
}

/// Fill `bags` (`lights_per_bag` consecutive entries per bag) by stratified
/// inversion of `cdf`.
pub fn fill_light_bags(bags: &mut [LightBagEntry], lights_per_bag: usize, cdf: &Cdf, seed: u32) {
    if cdf.is_empty() || lights_per_bag == 0 {
        bags.fill(LightBagEntry::default());
        return;
    }
    let inv = 1.0 / lights_per_bag as f32;
    bags.par_chunks_mut(lights_per_bag)
        .enumerate()
        .for_each(|(bag, entries)| {
            let mut rng = Rng::new(seed, bag as u32, 0x6c62);
            // Rotate the strata per bag so bags are not identical.
            let offset = rng.next_f32();
            for (i, entry) in entries.iter_mut().enumerate() {
                let u = ((i as f32 + offset) * inv).fract();
                // `sample` only fails on an empty distribution, handled above.
                let index = cdf.sample(u).unwrap_or(0);
                *entry = LightBagEntry {
                    light_index: index as u32,
                    pdf: cdf.pmf(index),
                };
            }
        });
}

/// Bag used by the grid cell containing pixel (`x`, `y`) this frame.
#[inline]
pub fn bag_for_pixel(x: u32, y: u32, grid_size: u32, num_bags: u32, seed: u32) -> u32 {
    let cell_x = x / grid_size.max(1);
    let cell_y = y / grid_size.max(1);
    let cell = wang_hash(cell_x.wrapping_mul(0x8da6_b343) ^ cell_y.wrapping_mul(0xd816_3841));
    wang_hash(cell ^ seed) % num_bags.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bags_follow_distribution() {
        let cdf = Cdf::build([1.0, 0.0, 3.0]);
        let mut bags = vec![LightBagEntry::default(); 4 * 100];
        fill_light_bags(&mut bags, 100, &cdf, 9);

        assert!(bags.iter().all(|e| e.light_index != 1));
        for bag in bags.chunks(100) {
            let heavy = bag.iter().filter(|e| e.light_index == 2).count();
            assert!((70..=80).contains(&heavy), "stratified bag drew {heavy}");
            for e in bag {
                assert_eq!(e.pdf, cdf.pmf(e.light_index as usize));
            }
        }
    }

    #[test]
    fn test_grid_cells_share_bag() {
        let a = bag_for_pixel(0, 0, 16, 50, 3);
        let b = bag_for_pixel(15, 15, 16, 50, 3);
        assert_eq!(a, b);
        assert!(a < 50);
    }
}

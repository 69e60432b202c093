//! B 帧时间直接预测与隐式加权.
//!
//! col 图像为 list1[0]. direct_8x8_inference_flag = 1, 每个 8x8 块取 col 宏块
//! 对应角上 4x4 块的运动. col 参考映射到当前 list0 中引用同一帧的最小索引.

use super::frames::{Frame, RefEntry, RefLists};
use super::macroblock::REF_NOT_USED;

/// 各 8x8 块使用的 col 角块 (光栅索引)
const CORNER_RASTER: [usize; 4] = [0, 3, 12, 15];

/// 时间距离缩放因子, 长期参考或 td = 0 时为 `None`
pub fn dist_scale_factor(cur_poc: i32, poc0: i32, poc1: i32) -> Option<i32> {
    let td = (poc1 - poc0).clamp(-128, 127);
    if td == 0 {
        return None;
    }
    let tb = (cur_poc - poc0).clamp(-128, 127);
    let tx = (16384 + (td / 2).abs()) / td;
    Some(((tb * tx + 32) >> 6).clamp(-1024, 1023))
}

/// 隐式双向预测权重 (w0, w1)
pub fn implicit_weights(cur_poc: i32, ref0: &RefEntry, ref1: &RefEntry) -> (i32, i32) {
    if ref0.long_term || ref1.long_term {
        return (32, 32);
    }
    match dist_scale_factor(cur_poc, ref0.poc, ref1.poc) {
        Some(dsf) if (-64..=128).contains(&(dsf >> 2)) => (64 - (dsf >> 2), dsf >> 2),
        _ => (32, 32),
    }
}

/// 一个 B slice 的帧级预测表
#[derive(Debug, Clone)]
pub struct BiPredTables {
    /// 按 list0 索引的缩放因子 (相对 list1[0])
    dist_scale: Vec<Option<i32>>,
    /// [list0 索引][list1 索引] 的隐式权重, 关闭加权时为空
    weights: Vec<Vec<(i32, i32)>>,
}

impl BiPredTables {
    pub fn new(cur_poc: i32, lists: &RefLists, implicit: bool) -> Self {
        let [l0, l1] = &lists.lists;
        let dist_scale = match l1.first() {
            Some(col) => l0
                .iter()
                .map(|r0| {
                    if r0.long_term {
                        None
                    } else {
                        dist_scale_factor(cur_poc, r0.poc, col.poc)
                    }
                })
                .collect(),
            None => vec![None; l0.len()],
        };
        let weights = if implicit {
            l0.iter()
                .map(|r0| l1.iter().map(|r1| implicit_weights(cur_poc, r0, r1)).collect())
                .collect()
        } else {
            Vec::new()
        };
        Self { dist_scale, weights }
    }

    /// 双向预测的权重, `None` 表示默认平均
    pub fn weights(&self, ref0: usize, ref1: usize) -> Option<(i32, i32)> {
        let w = *self.weights.get(ref0)?.get(ref1)?;
        (w != (32, 32)).then_some(w)
    }
}

/// 一个宏块的直接预测运动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectMotion {
    /// [列表][8x8 块]
    pub ref_idx: [[i8; 4]; 2],
    /// [列表][4x4 光栅块]
    pub mv: [[[i16; 2]; 16]; 2],
}

/// 时间直接预测推导器
pub struct TemporalDirect<'a> {
    col: &'a Frame,
    list0: &'a [RefEntry],
    tables: &'a BiPredTables,
}

impl<'a> TemporalDirect<'a> {
    pub fn new(col: &'a Frame, list0: &'a [RefEntry], tables: &'a BiPredTables) -> Self {
        Self { col, list0, tables }
    }

    /// col 图像中参考 `(list, ref_idx)` 映射到当前 list0 的索引
    fn map_col_to_list0(&self, list: usize, ref_idx: i8) -> usize {
        let id = usize::try_from(ref_idx)
            .ok()
            .and_then(|i| self.col.ref_ids[list].get(i));
        id.and_then(|id| self.list0.iter().position(|e| e.id == *id))
            .unwrap_or(0)
    }

    /// 推导地址为 `mb_xy` 的宏块的直接预测运动
    pub fn derive(&self, mb_xy: usize) -> DirectMotion {
        let mut out = DirectMotion {
            ref_idx: [[0; 4], [0; 4]],
            mv: [[[0; 2]; 16]; 2],
        };
        let Some(rec) = self.col.records.get(mb_xy) else {
            return out;
        };
        if rec.mb_type.is_intra() {
            return out;
        }
        for (b8, &corner) in CORNER_RASTER.iter().enumerate() {
            let list = if rec.ref_idx[0][b8] >= 0 { 0 } else { 1 };
            let ref_col = rec.ref_idx[list][b8];
            if ref_col == REF_NOT_USED {
                continue;
            }
            let mv_col = rec.mv[list][corner];
            let ref0 = self.map_col_to_list0(list, ref_col);
            let (mv0, mv1) = match self.tables.dist_scale.get(ref0).copied().flatten() {
                Some(dsf) => {
                    let scale = |v: i16| ((dsf * i32::from(v) + 128) >> 8) as i16;
                    let mv0 = [scale(mv_col[0]), scale(mv_col[1])];
                    (mv0, [mv0[0] - mv_col[0], mv0[1] - mv_col[1]])
                }
                None => (mv_col, [0, 0]),
            };
            out.ref_idx[0][b8] = ref0 as i8;
            out.ref_idx[1][b8] = 0;
            let (bx, by) = ((b8 & 1) * 2, (b8 >> 1) * 2);
            for y in by..by + 2 {
                for x in bx..bx + 2 {
                    out.mv[0][y * 4 + x] = mv0;
                    out.mv[1][y * 4 + x] = mv1;
                }
            }
        }
        out
    }
}

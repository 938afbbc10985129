use serde::{Deserialize, Serialize};
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug {}

/// Left-top-width-height format, contains left top corner and width-height
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltwh;
impl BBoxFormat for Ltwh {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// Center-x-y-width-height format, contains coordinates of the center of bbox and width-height
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Cxywh;
impl BBoxFormat for Cxywh {}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct BBox<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq>(
    [f32; 4],
    PhantomData<F>,
);

impl<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq> From<BBox<F>> for [f32; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.0
    }
}

impl<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.0
    }
}

impl BBox<Ltwh> {
    #[inline]
    pub fn ltwh(x: f32, y: f32, w: f32, h: f32) -> Self {
        BBox([x, y, w, h], Default::default())
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }

    #[inline]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline]
    pub fn as_cxywh(&self) -> BBox<Cxywh> {
        self.into()
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BBox<Ltwh>) -> f32 {
        let a = self.as_ltrb();
        let b = other.as_ltrb();

        let i_l = a.left().max(b.left());
        let i_t = a.top().max(b.top());
        let i_r = a.right().min(b.right());
        let i_b = a.bottom().min(b.bottom());

        let i_area = (i_r - i_l).max(0.) * (i_b - i_t).max(0.);
        let a_area = self.width() * self.height();
        let b_area = other.width() * other.height();

        i_area / (a_area + b_area - i_area)
    }

    /// Element-wise mean of a non-empty slice of boxes.
    pub fn mean(boxes: &[BBox<Ltwh>]) -> BBox<Ltwh> {
        let mut acc = [0.0f32; 4];
        for b in boxes {
            for (a, v) in acc.iter_mut().zip(b.as_slice()) {
                *a += v;
            }
        }

        let n = boxes.len() as f32;
        BBox::ltwh(acc[0] / n, acc[1] / n, acc[2] / n, acc[3] / n)
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(l: f32, t: f32, r: f32, b: f32) -> Self {
        BBox([l, t, r, b], Default::default())
    }

    #[inline]
    pub fn as_ltwh(&self) -> BBox<Ltwh> {
        self.into()
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }
}

impl BBox<Cxywh> {
    #[inline]
    pub fn cxywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        BBox([cx, cy, w, h], Default::default())
    }

    #[inline]
    pub fn as_ltwh(&self) -> BBox<Ltwh> {
        self.into()
    }

    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }
}

impl<'a> From<&'a BBox<Ltwh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Ltwh>) -> Self {
        Self(
            [v.0[0], v.0[1], v.0[0] + v.0[2], v.0[1] + v.0[3]],
            Default::default(),
        )
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Ltwh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        Self(
            [v.0[0], v.0[1], v.0[2] - v.0[0], v.0[3] - v.0[1]],
            Default::default(),
        )
    }
}

impl<'a> From<&'a BBox<Ltwh>> for BBox<Cxywh> {
    #[inline]
    fn from(v: &'a BBox<Ltwh>) -> Self {
        Self(
            [v.0[0] + v.0[2] / 2.0, v.0[1] + v.0[3] / 2.0, v.0[2], v.0[3]],
            Default::default(),
        )
    }
}

impl<'a> From<&'a BBox<Cxywh>> for BBox<Ltwh> {
    #[inline]
    fn from(v: &'a BBox<Cxywh>) -> Self {
        Self(
            [v.0[0] - v.0[2] / 2.0, v.0[1] - v.0[3] / 2.0, v.0[2], v.0[3]],
            Default::default(),
        )
    }
}

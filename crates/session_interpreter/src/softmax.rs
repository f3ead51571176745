use ndarray::Axis;
use quantcal_core::{
    op::{Op, Softmax},
    tensor::Tensor,
};
use quantcal_session::SessionError;

use super::elemwise::view;

pub(super) fn softmax(softmax: &Softmax, x: &Tensor) -> Result<Tensor, SessionError> {
    let x = view(&Op::Softmax(softmax.clone()), x)?;
    let rank = x.ndim() as i64;
    let axis = if softmax.axis < 0 {
        softmax.axis + rank
    } else {
        softmax.axis
    };
    if !(0..rank).contains(&axis) {
        return Err(SessionError::Message(
            format!("Softmax: axis {} out of range for rank {rank}", softmax.axis).into(),
        ));
    }

    let mut out = x.to_owned();
    for mut lane in out.lanes_mut(Axis(axis as usize)) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    Ok(Tensor::from_array(out))
}

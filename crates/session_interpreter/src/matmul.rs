use ndarray::{ArrayView2, Ix2};
use quantcal_core::{op::Op, tensor::Tensor};
use quantcal_session::SessionError;

use super::elemwise::view;

/// 2-D matrix product.
pub(super) fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor, SessionError> {
    let a = as_2d(a)?;
    let b = as_2d(b)?;
    if a.ncols() != b.nrows() {
        return Err(SessionError::Message(
            format!("MatMul: {:?} x {:?}", a.shape(), b.shape()).into(),
        ));
    }
    Ok(Tensor::from_array(a.dot(&b).into_dyn()))
}

fn as_2d(t: &Tensor) -> Result<ArrayView2<'_, f32>, SessionError> {
    view(&Op::MatMul, t)?
        .into_dimensionality::<Ix2>()
        .map_err(|e| SessionError::Message(format!("MatMul: {e}").into()))
}

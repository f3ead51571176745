use ndarray::{ArrayViewD, IxDyn, Zip};
use quantcal_core::{op::Op, tensor::Tensor};
use quantcal_session::SessionError;

pub(super) fn binary(op: &Op, a: &Tensor, b: &Tensor) -> Result<Tensor, SessionError> {
    let f: fn(f32, f32) -> f32 = match op {
        Op::Add => |a, b| a + b,
        Op::Sub => |a, b| a - b,
        Op::Mul => |a, b| a * b,
        Op::Div => |a, b| a / b,
        _ => return Err(SessionError::Message(format!("{} is not binary", op.name()).into())),
    };
    let a = view(op, a)?;
    let b = view(op, b)?;
    let shape = broadcast_shape(a.shape(), b.shape()).ok_or_else(|| {
        SessionError::Message(
            format!(
                "{}: cannot broadcast {:?} with {:?}",
                op.name(),
                a.shape(),
                b.shape()
            )
            .into(),
        )
    })?;
    let (Some(a), Some(b)) = (a.broadcast(IxDyn(&shape)), b.broadcast(IxDyn(&shape))) else {
        return Err(SessionError::Message("broadcast failed".into()));
    };
    Ok(Tensor::from_array(
        Zip::from(&a).and(&b).map_collect(|&a, &b| f(a, b)),
    ))
}

pub(super) fn unary(op: &Op, x: &Tensor) -> Result<Tensor, SessionError> {
    let f: fn(f32) -> f32 = match op {
        Op::ReLU => |x| x.max(0.),
        Op::ReLU6 => |x| x.clamp(0., 6.),
        Op::Sigmoid => |x| 1. / (1. + (-x).exp()),
        Op::Tanh => f32::tanh,
        _ => return Err(SessionError::Message(format!("{} is not unary", op.name()).into())),
    };
    Ok(Tensor::from_array(view(op, x)?.mapv(f)))
}

pub(super) fn view<'a>(op: &Op, x: &'a Tensor) -> Result<ArrayViewD<'a, f32>, SessionError> {
    match x.view::<f32>() {
        Some(Ok(view)) => Ok(view),
        Some(Err(e)) => Err(SessionError::Message(e.to_string().into())),
        None => Err(SessionError::ElemType {
            op: op.name(),
            ty: x.elem_ty(),
        }),
    }
}

/// Numpy-style broadcasting of two shapes.
fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let len = a.len().max(b.len());
    let mut shape = vec![0; len];
    for i in 0..len {
        let da = if i < len - a.len() { 1 } else { a[i - (len - a.len())] };
        let db = if i < len - b.len() { 1 } else { b[i - (len - b.len())] };
        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(shape)
}

#[test]
fn broadcast_shapes() {
    assert_eq!(broadcast_shape(&[4, 2], &[2]), Some(vec![4, 2]));
    assert_eq!(broadcast_shape(&[4, 1], &[1, 3]), Some(vec![4, 3]));
    assert_eq!(broadcast_shape(&[], &[3]), Some(vec![3]));
    assert_eq!(broadcast_shape(&[4, 2], &[3]), None);
}

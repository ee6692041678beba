mod adam;
mod any;
mod clip;
mod gradient_descent;
mod optimizer;

pub use adam::Adam;
pub use any::AnyOptimizer;
pub use clip::{clip_grad_norm, grad_norm};
pub use gradient_descent::GradientDescent;
pub use optimizer::{Optimizer, ParamGroup, SizeMismatchErr};

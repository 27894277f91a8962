//! WGSL generation from the kernel IR.
//!
//! Every generated kernel binds one uniform parameter array at binding 0 (see
//! [`Kernel::params`]) followed by one storage buffer per kernel binding, in order. Operand
//! indexing and reduction operators come from the composable modules of [`crate::shader`].

use crate::device::DeviceBuffer;
use crate::error::DeviceError;
use crate::kernel::{Access, Kernel, KernelBody, KernelExpr, ReduceBody, Store};
use crate::shader::{ReduceOps, Shader, ViewIndexing};
use naga_oil::compose::{Composer, NagaModuleDescriptor};
use wgpu::naga::Module;

/// Name of the entry point of every generated kernel.
pub const ENTRY_POINT: &str = "main";

/// Generates the WGSL source of `kernel`.
///
/// The source depends on the kernel’s structure and parameter counts, never on parameter
/// values, so it can be used as a pipeline cache key.
pub fn generate<B: DeviceBuffer<Scalar = f32>>(kernel: &Kernel<'_, B>) -> String {
    let gen = Generator { kernel };
    let mut src = String::new();
    gen.header(&mut src);
    match &kernel.body {
        KernelBody::Elementwise(stores) => gen.elementwise(&mut src, stores),
        KernelBody::Reduce(body) => gen.reduce(&mut src, body),
    }
    src
}

/// Composes a generated kernel source with the modules it imports.
pub fn compose(source: &str) -> Result<Module, DeviceError> {
    let shader_err = |e: naga_oil::compose::ComposerError| {
        DeviceError::ShaderComposition(e.emit_to_string(&Composer::default()))
    };
    let mut composer = ViewIndexing::composer().map_err(shader_err)?;
    ReduceOps::compose(&mut composer).map_err(shader_err)?;
    composer
        .make_naga_module(NagaModuleDescriptor {
            source,
            file_path: "wgblas_kernel.wgsl",
            ..Default::default()
        })
        .map_err(|e| DeviceError::ShaderComposition(e.emit_to_string(&composer)))
}

struct Generator<'k, 'a, B: DeviceBuffer> {
    kernel: &'k Kernel<'a, B>,
}

impl<B: DeviceBuffer> Generator<'_, '_, B> {
    fn header(&self, src: &mut String) {
        let kernel = self.kernel;
        src.push_str("#import wgblas::view::{view_index}\n");
        if let KernelBody::Reduce(body) = &kernel.body {
            let op = body.op;
            let mut items = vec![op.init_fn(), op.combine_fn()];
            if body.map_source {
                items.push(op.map_fn());
            }
            src.push_str(&format!("#import wgblas::reduce_ops::{{{}}}\n", items.join(", ")));
        }
        src.push('\n');

        let num_params = kernel.params().len().max(1);
        src.push_str(&format!(
            "@group(0) @binding(0)\nvar<uniform> params: array<vec4<u32>, {num_params}>;\n"
        ));
        for (i, binding) in kernel.bindings.iter().enumerate() {
            let access = match binding.access {
                Access::Read => "read",
                Access::ReadWrite => "read_write",
            };
            src.push_str(&format!(
                "@group(0) @binding({})\nvar<storage, {access}> b{i}: array<f32>;\n",
                i + 1
            ));
        }
        src.push('\n');
    }

    fn shape(&self, shape: u32) -> String {
        format!("params[{}]", self.kernel.shape_param(shape))
    }

    fn len(&self, len: u32) -> String {
        format!("params[{}].x", self.kernel.len_param(len))
    }

    fn element(&self, binding: u32, shape: u32, index: &str) -> String {
        format!("b{binding}[view_index({}, {index})]", self.shape(shape))
    }

    fn expr(&self, expr: &KernelExpr, index: &str) -> String {
        match expr {
            KernelExpr::Load { binding, shape } => self.element(*binding, *shape, index),
            KernelExpr::Scalar(k) => {
                format!("bitcast<f32>(params[{}].x)", self.kernel.scalar_param(*k))
            }
            KernelExpr::Unary(op, a) => op.wgsl(&self.expr(a, index)),
            KernelExpr::Binary(op, a, b) => op.wgsl(&self.expr(a, index), &self.expr(b, index)),
        }
    }

    fn elementwise(&self, src: &mut String, stores: &[Store]) {
        let wg = self.kernel.workgroup_size;
        src.push_str(&format!(
            "@compute @workgroup_size({wg}, 1, 1)
fn main(
    @builtin(global_invocation_id) invocation_id: vec3<u32>,
    @builtin(num_workgroups) num_workgroups: vec3<u32>,
) {{
    let i = invocation_id.x + invocation_id.y * num_workgroups.x * {wg}u;\n"
        ));
        for store in stores {
            src.push_str(&format!(
                "    if i < {} {{\n        {} = {};\n    }}\n",
                self.len(store.len),
                self.element(store.binding, store.shape, "i"),
                self.expr(&store.value, "i")
            ));
        }
        src.push_str("}\n");
    }

    fn reduce(&self, src: &mut String, body: &ReduceBody) {
        let wg = self.kernel.workgroup_size;
        let n = body.operands.len() as u32;
        let (init, combine) = (body.op.init_fn(), body.op.combine_fn());

        src.push_str(&format!(
            "var<workgroup> partials: array<f32, {}>;

@compute @workgroup_size({wg}, 1, 1)
fn main(
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(workgroup_id) group_id: vec3<u32>,
    @builtin(num_workgroups) num_workgroups: vec3<u32>,
) {{
    let lane = local_id.x;
    let group_index = group_id.x;
    let len = {};
    let stride = num_workgroups.x * {wg}u;\n",
            (wg * n).max(1),
            self.len(body.len)
        ));

        for k in 0..n {
            src.push_str(&format!("    var acc{k} = {init}();\n"));
        }
        src.push_str(&format!(
            "    for (var i = group_index * {wg}u + lane; i < len; i += stride) {{\n"
        ));
        for (k, operand) in body.operands.iter().enumerate() {
            let mut value = self.expr(&operand.source, "i");
            if body.map_source {
                value = format!("{}({value})", body.op.map_fn());
            }
            src.push_str(&format!("        acc{k} = {combine}(acc{k}, {value});\n"));
        }
        src.push_str("    }\n");

        for k in 0..n {
            src.push_str(&format!("    partials[{}u + lane] = acc{k};\n", k * wg));
        }
        src.push_str("    workgroupBarrier();\n\n");

        // The tree is unrolled so that every barrier is in uniform control flow.
        let mut s = wg / 2;
        while s > 0 {
            src.push_str(&format!("    if lane < {s}u {{\n"));
            for k in 0..n {
                let base = k * wg;
                src.push_str(&format!(
                    "        partials[{base}u + lane] = {combine}(partials[{base}u + lane], partials[{}u + lane]);\n",
                    base + s
                ));
            }
            src.push_str("    }\n    workgroupBarrier();\n");
            s /= 2;
        }

        src.push_str("\n    if lane == 0u {\n");
        for (k, operand) in body.operands.iter().enumerate() {
            let out = self.element(operand.output, operand.output_shape, "group_index");
            let result = format!("partials[{}u]", k as u32 * wg);
            if body.accumulate {
                src.push_str(&format!("        {out} = {combine}({out}, {result});\n"));
            } else {
                src.push_str(&format!("        {out} = {result};\n"));
            }
        }
        src.push_str("    }\n}\n");
    }
}

#[cfg(test)]
mod test {
    use super::{compose, generate};
    use crate::host::HostBuffer;
    use crate::kernel::{
        Access, BinaryOp, Binding, Kernel, KernelBody, KernelExpr, ReduceBody, ReduceOp,
        ReduceOperand, Store, UnaryOp,
    };
    use crate::shapes::ViewShape;
    use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

    fn validate(src: &str) {
        let module = compose(src).unwrap_or_else(|e| panic!("{e}\n{src}"));
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .unwrap_or_else(|e| panic!("{e:?}\n{src}"));
    }

    fn load(binding: u32, shape: u32) -> Box<KernelExpr> {
        Box::new(KernelExpr::Load { binding, shape })
    }

    #[test]
    fn elementwise_kernel_validates() {
        let x = HostBuffer::<f32>::zeros(16);
        let y = HostBuffer::<f32>::zeros(16);
        let kernel = Kernel {
            label: "join",
            bindings: vec![
                Binding {
                    buffer: &y,
                    access: Access::ReadWrite,
                },
                Binding {
                    buffer: &x,
                    access: Access::Read,
                },
            ],
            shapes: vec![
                ViewShape::vector(0, 1, 8),
                ViewShape::vector(1, 2, 8),
                ViewShape::vector(15, -1, 4),
            ],
            lens: vec![8, 4],
            scalars: vec![2.5],
            body: KernelBody::Elementwise(vec![
                Store {
                    binding: 0,
                    shape: 0,
                    len: 0,
                    value: KernelExpr::Binary(
                        BinaryOp::Add,
                        load(0, 0),
                        Box::new(KernelExpr::Binary(
                            BinaryOp::Mul,
                            Box::new(KernelExpr::Scalar(0)),
                            load(1, 1),
                        )),
                    ),
                },
                Store {
                    binding: 0,
                    shape: 2,
                    len: 1,
                    value: KernelExpr::Unary(UnaryOp::Sqrt, load(1, 2)),
                },
            ]),
            workgroup_size: 64,
            num_workgroups: 1,
        };

        let src = generate(&kernel);
        assert!(src.contains("@workgroup_size(64, 1, 1)"));
        assert!(src.contains("var<storage, read> b1: array<f32>;"));
        validate(&src);
    }

    #[test]
    fn fused_reduction_kernel_validates() {
        let x = HostBuffer::<f32>::zeros(64);
        let scratch = HostBuffer::<f32>::zeros(8);
        let operands = (0..4)
            .map(|k| ReduceOperand {
                source: *load(0, k),
                output: 1,
                output_shape: 4 + k,
            })
            .collect();
        let mut shapes: Vec<_> = (0..4).map(|k| ViewShape::vector(k * 16, 1, 16)).collect();
        shapes.extend((0..4).map(|k| ViewShape::vector(k * 2, 1, 2)));

        for (map_source, accumulate) in [(true, false), (false, true)] {
            let kernel = Kernel {
                label: "asum4",
                bindings: vec![
                    Binding {
                        buffer: &x,
                        access: Access::Read,
                    },
                    Binding {
                        buffer: &scratch,
                        access: Access::ReadWrite,
                    },
                ],
                shapes: shapes.clone(),
                lens: vec![16],
                scalars: vec![],
                body: KernelBody::Reduce(ReduceBody {
                    op: ReduceOp::AbsSum,
                    len: 0,
                    map_source,
                    accumulate,
                    operands: Vec::clone(&operands),
                }),
                workgroup_size: 8,
                num_workgroups: 2,
            };

            let src = generate(&kernel);
            assert!(src.contains("array<f32, 32>"));
            if map_source {
                assert!(src.starts_with(
                    "#import wgblas::view::{view_index}\n#import wgblas::reduce_ops::{init_zero, combine_sum, map_abs}\n\n"
                ));
            }
            assert_eq!(src.matches("workgroupBarrier();\n").count(), 4);
            validate(&src);
        }
    }

    #[test]
    fn reduce_operators_compose() {
        let x = HostBuffer::<f32>::zeros(4);
        for op in [ReduceOp::Sum, ReduceOp::SqNorm, ReduceOp::Max, ReduceOp::Min] {
            let kernel = Kernel {
                label: "reduce",
                bindings: vec![Binding {
                    buffer: &x,
                    access: Access::ReadWrite,
                }],
                shapes: vec![ViewShape::vector(0, 1, 3), ViewShape::vector(3, 1, 1)],
                lens: vec![3],
                scalars: vec![],
                body: KernelBody::Reduce(ReduceBody {
                    op,
                    len: 0,
                    map_source: true,
                    accumulate: false,
                    operands: vec![ReduceOperand {
                        source: *load(0, 0),
                        output: 0,
                        output_shape: 1,
                    }],
                }),
                workgroup_size: 1,
                num_workgroups: 1,
            };
            validate(&generate(&kernel));
        }
    }
}

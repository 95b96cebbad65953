//! PTX compiled by `build.rs` from the `.cu` sources in this directory.

pub const ELEMENTWISE_PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/elementwise.ptx"));
pub const CONV_PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/conv.ptx"));
pub const POOLING_PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/pooling.ptx"));
pub const ACTIVATION_PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/activation.ptx"));

/// Module name, PTX source and the kernels each module must export.
pub const MODULES: [(&str, &str, &[&str]); 4] = [
    (
        "elementwise",
        ELEMENTWISE_PTX,
        &["add_scaled_kernel", "fill_kernel", "scale_kernel", "channel_sums_kernel"],
    ),
    (
        "conv",
        CONV_PTX,
        &[
            "im2col_kernel",
            "col2im_add_kernel",
            "conv_forward_direct_kernel",
            "conv_backward_data_direct_kernel",
            "conv_backward_filter_direct_kernel",
        ],
    ),
    (
        "pooling",
        POOLING_PTX,
        &["max_pool_forward_kernel", "max_pool_backward_kernel"],
    ),
    (
        "activation",
        ACTIVATION_PTX,
        &[
            "softmax_kernel",
            "softmax_backward_kernel",
            "sigmoid_kernel",
            "sigmoid_backward_kernel",
            "relu_kernel",
            "relu_backward_kernel",
            "tanh_kernel",
            "tanh_backward_kernel",
        ],
    ),
];

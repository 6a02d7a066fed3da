use burn::backend::Autodiff;

/// GPU through wgpu unless the `ndarray` feature asks for the CPU backend.
#[cfg(not(feature = "ndarray"))]
mod selected {
    pub type Inner = burn::backend::Wgpu;
}

#[cfg(feature = "ndarray")]
mod selected {
    pub type Inner = burn::backend::NdArray;
}

/// Backend the trainer differentiates through; evaluation runs on its inner backend.
pub type TrainBackend = Autodiff<selected::Inner>;

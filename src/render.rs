//! Plane upload and YCbCr to RGB conversion on the GPU.

use std::{mem, sync::Arc};

use wgpu::{util::DeviceExt, *};

use crate::{
    error::{Error, Result},
    image::Image,
    metadata::{Decimation, Vertex},
};

const PLANE_FORMAT: TextureFormat = TextureFormat::R8Uint;
const PLANE_NAMES: [&str; 3] = ["y_tex", "u_tex", "v_tex"];

/// An open handle to a GPU.
pub struct Gpu {
    device: Arc<Device>,
    queue: Arc<Queue>,
}

impl Gpu {
    pub fn device_descriptor() -> DeviceDescriptor<'static> {
        DeviceDescriptor {
            label: Some("hyjpeg"),
            ..Default::default()
        }
    }

    /// Opens the default adapter, without a surface to present to.
    pub async fn open() -> Result<Self> {
        let instance = Instance::new(InstanceDescriptor {
            // The OpenGL backend panics spuriously, so don't enable it.
            backends: Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&RequestAdapterOptions::default())
            .await
            .ok_or_else(|| Error::gpu("no supported graphics adapter found"))?;
        let info = adapter.get_info();
        log::debug!("using {} ({:?}, {})", info.name, info.backend, info.driver);
        let (device, queue) = adapter
            .request_device(&Self::device_descriptor(), None)
            .await
            .map_err(|e| Error::gpu(format!("no supported graphics device found: {e}")))?;

        Ok(Self::from_wgpu(device.into(), queue.into()))
    }

    pub fn from_wgpu(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self { device, queue }
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &Queue {
        &self.queue
    }
}

/// Uploads the planes of an [`Image`] as `R8Uint` textures and draws them as RGB.
pub struct Renderer {
    gpu: Arc<Gpu>,
    pipeline: RenderPipeline,
    vertices: Buffer,
    bind_group: BindGroup,
    textures: [Texture; 3],
}

impl Renderer {
    /// Creates the textures and pipeline for drawing `image` into targets of `target_format`.
    ///
    /// Fails with [`ErrorKind::Unsupported`](crate::ErrorKind::Unsupported) unless the image
    /// has three planes with a full-resolution first plane, and with
    /// [`ErrorKind::Gpu`](crate::ErrorKind::Gpu) if the device rejects the shader or pipeline.
    pub fn new(gpu: Arc<Gpu>, image: &Image, target_format: TextureFormat) -> Result<Self> {
        let [y, u, v] = image.planes() else {
            return Err(Error::unsupported(format!(
                "cannot render an image with {} planes (only 3-plane YCbCr is supported)",
                image.plane_count()
            )));
        };
        if y.x_dec != 0 || y.y_dec != 0 {
            return Err(Error::unsupported(format!(
                "luma plane is subsampled (xdec = {}, ydec = {})",
                y.x_dec, y.y_dec
            )));
        }
        let max_dim = gpu.device.limits().max_texture_dimension_2d;
        if y.width > max_dim || y.height > max_dim {
            return Err(Error::gpu(format!(
                "{}x{} plane exceeds the maximum texture size of {max_dim}",
                y.width, y.height
            )));
        }

        let device = &gpu.device;
        device.push_error_scope(ErrorFilter::Validation);

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("yuv_shader"),
            source: ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let plane_entry = |binding| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Uint,
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("yuv_bind_group_layout"),
            entries: &[
                plane_entry(0),
                plane_entry(1),
                plane_entry(2),
                // `decimation`
                BindGroupLayoutEntry {
                    binding: 3,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("yuv_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("yuv_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[VertexBufferLayout {
                    array_stride: mem::size_of::<Vertex>() as BufferAddress,
                    step_mode: VertexStepMode::Vertex,
                    // `in_pos`, `in_tex`
                    attributes: &vertex_attr_array![0 => Float32x3, 1 => Sint32x2],
                }],
            },
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                })],
            }),
            multiview: None,
        });

        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(Error::gpu(format!("failed to create YCbCr pipeline: {e}")));
        }

        let vertices = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("quad_vertices"),
            contents: bytemuck::cast_slice(&Vertex::quad(image.width(), image.height())),
            usage: BufferUsages::VERTEX,
        });
        let decimation = Decimation::new(u, v);
        log::debug!("chroma decimation: {decimation:?}");
        let decimation = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("decimation"),
            contents: bytemuck::bytes_of(&decimation),
            usage: BufferUsages::UNIFORM,
        });

        let planes = [y, u, v];
        let textures: [Texture; 3] = std::array::from_fn(|i| {
            let plane = planes[i];
            log::debug!(
                "{}: {}x{} {PLANE_FORMAT:?} texture",
                PLANE_NAMES[i],
                plane.width,
                plane.height
            );
            device.create_texture(&TextureDescriptor {
                label: Some(PLANE_NAMES[i]),
                size: Extent3d {
                    width: plane.width,
                    height: plane.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: PLANE_FORMAT,
                usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                view_formats: &[],
            })
        });
        let views = textures
            .each_ref()
            .map(|texture| texture.create_view(&TextureViewDescriptor::default()));

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("yuv_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&views[0]),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&views[1]),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(&views[2]),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: decimation.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            gpu,
            pipeline,
            vertices,
            bind_group,
            textures,
        })
    }

    /// Re-uploads every plane of `image`, which must have the geometry this renderer was created
    /// for.
    pub fn upload(&self, image: &Image) {
        for (texture, plane) in self.textures.iter().zip(image.planes()) {
            debug_assert_eq!(
                (texture.width(), texture.height()),
                (plane.width, plane.height)
            );
            self.gpu.queue.write_texture(
                texture.as_image_copy(),
                &plane.data,
                ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(plane.y_stride as u32),
                    rows_per_image: None,
                },
                texture.size(),
            );
        }
    }

    /// Clears `target` and draws the most recently uploaded planes into it.
    pub fn draw(&self, target: &TextureView) {
        let mut enc = self
            .gpu
            .device
            .create_command_encoder(&CommandEncoderDescriptor::default());
        let mut pass = enc.begin_render_pass(&RenderPassDescriptor {
            label: Some("yuv_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(Color::BLACK),
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertices.slice(..));
        pass.draw(0..4, 0..1);
        drop(pass);

        self.gpu.queue.submit([enc.finish()]);
    }
}

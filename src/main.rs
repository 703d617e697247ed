use std::{env, fs, io, process, sync::Arc, time::Instant};

use anyhow::{anyhow, Context};
use hyjpeg::{
    decode_into, usage, Decompressor, FrameReport, FrameTimer, Gpu, Image, Options, Renderer,
};
use wgpu::{
    Backends, CompositeAlphaMode, Device, Instance, InstanceDescriptor, PresentMode,
    RequestAdapterOptions, Surface, SurfaceConfiguration, SurfaceError, TextureUsages,
    TextureViewDescriptor,
};
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowBuilder},
};

const NAME: &str = env!("CARGO_PKG_NAME");

fn main() {
    env_logger::builder()
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(e) = run() {
        log::error!("{e:#}");
        process::exit(1);
    }
}

fn exit_with_usage(message: Option<&str>) -> ! {
    if let Some(message) = message {
        eprintln!("{message}");
    }
    eprint!("{}", usage());
    process::exit(1);
}

fn run() -> anyhow::Result<()> {
    let options = match Options::parse(env::args_os()) {
        Ok(options) => options,
        Err(req) => exit_with_usage(req.message()),
    };

    let mut jpeg = Vec::new();
    for path in &options.files {
        jpeg = fs::read(path)
            .with_context(|| format!("could not open jpeg file {}", path.display()))?;
    }
    if jpeg.is_empty() {
        exit_with_usage(None);
    }

    let image = Image::from_jpeg(&jpeg)?;

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(NAME)
        .with_inner_size(PhysicalSize::new(image.width(), image.height()))
        .build(&event_loop)?;

    let render = if options.gpu {
        Some(RenderContext::new(&window, &image)?)
    } else {
        None
    };

    let mut harness = Harness {
        timer: FrameTimer::new(Instant::now(), image.total_samples()),
        jpeg: &jpeg,
        image,
        decoder: None,
        render,
        frame: 0,
        options,
    };

    let mut result = Ok(());
    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run(|event, elwt| match event {
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        }
        | Event::WindowEvent {
            event:
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(KeyCode::Escape),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                },
            ..
        } => elwt.exit(),
        Event::WindowEvent {
            event: WindowEvent::Resized(size),
            ..
        } => {
            if let Some(render) = &mut harness.render {
                render.resize(size);
            }
        }
        Event::AboutToWait => match harness.step() {
            Ok(Some(report)) => {
                window.set_title(&report.title(NAME, harness.options.gpu));
                log::debug!("{report:?}");
            }
            Ok(None) => {}
            Err(e) => {
                result = Err(e);
                elwt.exit();
            }
        },
        _ => {}
    })?;

    result
}

/// Per-frame state of the benchmark loop.
struct Harness<'a> {
    options: Options,
    jpeg: &'a [u8],
    image: Image,
    /// Only used with `--reuse-decoder`.
    decoder: Option<Decompressor<'a>>,
    render: Option<RenderContext>,
    timer: FrameTimer,
    frame: u64,
}

impl<'a> Harness<'a> {
    fn step(&mut self) -> anyhow::Result<Option<FrameReport>> {
        if self.options.cpu {
            self.decode()?;
        }
        if self.options.dump_frame == Some(self.frame) {
            self.image.dump(io::stdout().lock())?;
        }
        if let Some(render) = &mut self.render {
            render.draw(&self.image)?;
        }

        self.frame += 1;
        Ok(self.timer.tick(Instant::now()))
    }

    fn decode(&mut self) -> anyhow::Result<()> {
        if !self.options.reuse_decoder {
            decode_into(self.jpeg, &mut self.image, self.options.dct)?;
            return Ok(());
        }

        match &mut self.decoder {
            Some(decoder) => decoder.rewind()?,
            None => {
                let mut decoder = Decompressor::new(self.jpeg)?;
                decoder.read_header()?;
                decoder.set_dct_method(self.options.dct);
                decoder.start()?;
                self.decoder = Some(decoder);
            }
        }
        if let Some(decoder) = &mut self.decoder {
            decoder.read_image(&mut self.image)?;
            decoder.finish()?;
        }
        Ok(())
    }
}

/// The window surface and everything needed to draw into it.
struct RenderContext {
    surface: Surface,
    device: Arc<Device>,
    config: SurfaceConfiguration,
    renderer: Renderer,
}

impl RenderContext {
    fn new(window: &Window, image: &Image) -> anyhow::Result<Self> {
        let instance = Instance::new(InstanceDescriptor {
            // The OpenGL backend panics spuriously, so don't enable it.
            backends: Backends::PRIMARY,
            ..Default::default()
        });
        let surface = unsafe { instance.create_surface(window)? };
        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            compatible_surface: Some(&surface),
            ..Default::default()
        }))
        .ok_or_else(|| anyhow!("no compatible graphics adapter found"))?;

        let info = adapter.get_info();
        log::info!("adapter: {} ({:?})", info.name, info.backend);
        log::info!("driver: {} {}", info.driver, info.driver_info);

        let (device, queue) =
            pollster::block_on(adapter.request_device(&Gpu::device_descriptor(), None))?;
        let (device, queue) = (Arc::new(device), Arc::new(queue));

        let caps = surface.get_capabilities(&adapter);
        // `rgb / 255` should reach the display unchanged, so avoid sRGB encoding.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface is incompatible with the graphics adapter"))?;
        log::info!("surface format: {format:?}");

        let size = window.inner_size();
        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: PresentMode::AutoNoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(CompositeAlphaMode::Auto),
            view_formats: Vec::new(),
        };
        surface.configure(&device, &config);

        let gpu = Arc::new(Gpu::from_wgpu(device.clone(), queue));
        let renderer = Renderer::new(gpu, image, format)?;

        Ok(Self {
            surface,
            device,
            config,
            renderer,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.device, &self.config);
    }

    fn draw(&mut self, image: &Image) -> anyhow::Result<()> {
        let frame = loop {
            match self.surface.get_current_texture() {
                Ok(frame) => break frame,
                Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                    self.surface.configure(&self.device, &self.config);
                }
                Err(SurfaceError::Timeout) => {
                    log::warn!("timed out waiting for the next surface texture");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.renderer.upload(image);
        let view = frame.texture.create_view(&TextureViewDescriptor::default());
        self.renderer.draw(&view);
        frame.present();
        Ok(())
    }
}

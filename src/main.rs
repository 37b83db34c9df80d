//! `pandad`: startup sequencing for the PandA-style register-control and
//! capture server. Parses the three startup databases, validates the
//! hardware build's named-register assumptions, builds the live entity
//! registry, selects a hardware backend, replays persisted state, then
//! spawns every long-lived worker thread for the process lifetime.

use std::net::TcpListener;
use std::os::unix::io::FromRawFd;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use argh::FromArgs;
use base::ShutdownFlag;
use panda_capture::CaptureBuffer;
use panda_capture::CaptureController;
use panda_capture::DEFAULT_BLOCK_COUNT;
use panda_capture::DEFAULT_BLOCK_SIZE;
use panda_entity::EntityRegistry;
use panda_hw::DeviceHardware;
use panda_hw::HardwareAccess;
use panda_hw::NullHardware;
use panda_parser::ast::DescriptionDb;
use panda_proto::Shared;

/// Default poll:holdoff:backoff persistence timeouts, in seconds.
const DEFAULT_TIMEOUTS: &str = "5:0.5:5";

/// The bit/position bus refresh has no dedicated CLI flag; a fixed
/// interval short enough to keep `bit_out`/`pos_out` change reporting
/// responsive is used instead (see DESIGN.md).
const BUS_REFRESH_INTERVAL: Duration = Duration::from_millis(20);

/// Data-socket write timeout: a stuck client is dropped rather than
/// stalling the reader.
const DATA_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Command/data/capture server for a PandA-style register-and-DMA
/// hardware controller.
#[derive(FromArgs)]
struct Args {
    /// command protocol TCP port
    #[argh(option, short = 'p', default = "8888")]
    command_port: u16,

    /// data protocol TCP port
    #[argh(option, short = 'd', default = "8889")]
    data_port: u16,

    /// set SO_REUSEADDR on both listening sockets
    #[argh(switch, short = 'R')]
    reuse_addr: bool,

    /// path to the config database
    #[argh(option, short = 'c')]
    config: PathBuf,

    /// path to the registers database
    #[argh(option, short = 'r')]
    registers: PathBuf,

    /// path to the description database
    #[argh(option, short = 'D')]
    description: Option<PathBuf>,

    /// path to the persistence file
    #[argh(option, short = 'f')]
    persist: PathBuf,

    /// poll:holdoff:backoff persistence timeouts in seconds
    #[argh(option, short = 't', default = "String::from(DEFAULT_TIMEOUTS)")]
    timeouts: String,

    /// extension server TCP port (accepted for CLI compatibility; no
    /// extension protocol is defined, so no listener is opened)
    #[argh(option, short = 'X')]
    extension_port: Option<u16>,

    /// path to a MAC address file applied at startup
    #[argh(option, short = 'M')]
    mac: Option<PathBuf>,

    /// use the in-process NullHardware backend instead of opening
    /// /dev/panda.{map,block,stream}
    #[argh(switch)]
    simulate: bool,

    /// enable debug-level logging (finer control via RUST_LOG)
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn main() {
    let args: Args = argh::from_env();
    base::logging::init(if args.verbose { 1 } else { 0 });

    if let Err(e) = run(args) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let (poll, holdoff, backoff) = parse_timeouts(&args.timeouts)?;

    let config_text = read_to_string(&args.config)?;
    let config = panda_parser::parse_config(&path_label(&args.config), &config_text).context("parsing config database")?;

    let registers_text = read_to_string(&args.registers)?;
    let registers =
        panda_parser::parse_registers(&path_label(&args.registers), &registers_text).context("parsing registers database")?;

    let description = match &args.description {
        Some(path) => {
            let text = read_to_string(path)?;
            panda_parser::parse_description(&path_label(path), &text).context("parsing description database")?
        }
        None => DescriptionDb::default(),
    };

    panda_hw::validate_named_registers(&registers.named_registers).context("validating named registers")?;

    let registry =
        Arc::new(EntityRegistry::build(&config, &registers, &description).context("building entity registry from startup databases")?);
    log::info!("entity registry built: {} blocks", registry.blocks().count());

    let hw: Arc<dyn HardwareAccess> = if args.simulate {
        log::info!("--simulate given: using in-process NullHardware");
        Arc::new(NullHardware::new())
    } else {
        Arc::new(DeviceHardware::open().context("opening hardware device files")?)
    };

    if let Some(mac_path) = &args.mac {
        panda_persist::load_mac_file(mac_path, hw.as_ref())
            .with_context(|| format!("loading MAC address file {}", mac_path.display()))?;
    }

    panda_persist::replay_persistence_file(&args.persist, &registry, hw.as_ref())
        .with_context(|| format!("replaying persistence file {}", args.persist.display()))?;

    if let Some(port) = args.extension_port {
        log::warn!("-X {port} accepted but no extension protocol is implemented; ignoring");
    }

    let shutdown = ShutdownFlag::new();
    install_signal_handlers(shutdown.clone()).context("installing signal handlers")?;

    let buffer = Arc::new(CaptureBuffer::new(DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_COUNT));
    let capture = Arc::new(CaptureController::new(registry.clone(), hw.clone(), buffer));

    let shared = Arc::new(Shared {
        registry: registry.clone(),
        hw: hw.clone(),
        capture: capture.clone(),
        write_timeout: DATA_WRITE_TIMEOUT,
    });

    let command_listener = bind_listener(args.command_port, args.reuse_addr)
        .with_context(|| format!("binding command listener on port {}", args.command_port))?;
    let data_listener =
        bind_listener(args.data_port, args.reuse_addr).with_context(|| format!("binding data listener on port {}", args.data_port))?;
    log::info!("listening: command={} data={}", args.command_port, args.data_port);

    let mut workers = Vec::new();

    {
        let shared = shared.clone();
        let shutdown = shutdown.clone();
        workers.push(std::thread::spawn(move || panda_proto::serve_command(command_listener, shared, shutdown)));
    }
    {
        let shared = shared.clone();
        let shutdown = shutdown.clone();
        workers.push(std::thread::spawn(move || panda_proto::serve_data(data_listener, shared, shutdown)));
    }
    {
        let capture = capture.clone();
        let shutdown = shutdown.clone();
        workers.push(std::thread::spawn(move || panda_capture::run_dma_reader(capture, shutdown)));
    }
    {
        let registry = registry.clone();
        let hw = hw.clone();
        let persist_path = args.persist.clone();
        let shutdown = shutdown.clone();
        workers.push(std::thread::spawn(move || {
            panda_persist::run_persistence_thread(registry, hw, persist_path, poll, holdoff, backoff, shutdown)
        }));
    }
    {
        let registry = registry.clone();
        let hw = hw.clone();
        let shutdown = shutdown.clone();
        workers.push(std::thread::spawn(move || panda_entity::run_bus_refresh_thread(registry, hw, BUS_REFRESH_INTERVAL, shutdown)));
    }

    for worker in workers {
        let _ = worker.join();
    }
    log::info!("pandad shut down cleanly");
    Ok(())
}

fn parse_timeouts(spec: &str) -> Result<(Duration, Duration, Duration)> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 {
        bail!("-t expects poll:holdoff:backoff, got {spec:?}");
    }
    let to_duration = |s: &str| -> Result<Duration> {
        let secs: f64 = s.parse().with_context(|| format!("invalid timeout {s:?}"))?;
        Ok(Duration::from_secs_f64(secs))
    };
    Ok((to_duration(parts[0])?, to_duration(parts[1])?, to_duration(parts[2])?))
}

fn path_label(path: &Path) -> String {
    path.display().to_string()
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Opens a listening IPv4 TCP socket directly via `libc` rather than
/// `std::net::TcpListener::bind`, since `-R` needs `SO_REUSEADDR` applied
/// before `bind()` and std exposes no hook for that.
fn bind_listener(port: u16, reuse_addr: bool) -> Result<TcpListener> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        bail!("socket() failed: {}", std::io::Error::last_os_error());
    }

    if reuse_addr {
        let optval: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &optval as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            bail!("setsockopt(SO_REUSEADDR) failed: {err}");
        }
    }

    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr { s_addr: 0 },
        sin_zero: [0; 8],
    };
    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        bail!("bind() on port {port} failed: {err}");
    }

    let rc = unsafe { libc::listen(fd, 128) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        bail!("listen() on port {port} failed: {err}");
    }

    Ok(unsafe { TcpListener::from_raw_fd(fd) })
}

/// Write end of the self-pipe a signal handler uses to wake the shutdown
/// thread; async-signal-safe `write()` is the only thing the handler
/// itself does: SIGINT/SIGTERM/SIGHUP trigger orderly shutdown.
static SIGNAL_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn handle_signal(_sig: libc::c_int) {
    let fd = SIGNAL_WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte: u8 = 0;
        unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
    }
}

fn install_signal_handlers(shutdown: ShutdownFlag) -> Result<()> {
    let mut fds: [RawFd; 2] = [-1, -1];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        bail!("pipe() failed: {}", std::io::Error::last_os_error());
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);
    SIGNAL_WRITE_FD.store(write_fd, Ordering::SeqCst);

    for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
        unsafe {
            libc::signal(sig, handle_signal as libc::sighandler_t);
        }
    }

    std::thread::spawn(move || {
        let mut byte = [0u8; 1];
        unsafe { libc::read(read_fd, byte.as_mut_ptr() as *mut libc::c_void, 1) };
        log::info!("shutdown signal received, stopping workers");
        shutdown.signal();
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    });

    Ok(())
}

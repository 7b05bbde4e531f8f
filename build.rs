use cfg_aliases::cfg_aliases;

fn main() {
    // Setup alias to reduce `cfg` boilerplate.
    cfg_aliases! {
        // Systems.
        macos_platform: { target_os = "macos" },
        apple: { any(target_os = "ios", target_os = "macos") },
        free_unix: { all(unix, not(apple), not(target_os = "android")) },

        // Native displays.
        x11_platform: { all(feature = "x11", free_unix) },

        // Backends.
        egl_backend: { all(feature = "egl", free_unix) },
        glx_backend: { all(feature = "glx", x11_platform) },
        wgl_backend: { all(feature = "wgl", windows) },
        cgl_backend: { macos_platform },
        osmesa_backend: { all(feature = "osmesa", free_unix) },
    }
}
